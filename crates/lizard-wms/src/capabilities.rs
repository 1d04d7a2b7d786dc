//! GetCapabilities parsing into layer data source URIs.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use lizard_common::ItemKind;

use crate::error::{WmsError, WmsResult};

const EXCEPTION_NOT_FOUND: &str = "Exception details not found";

/// One previewable layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WmsLayerUri {
    pub title: String,
    /// `&`-joined, sorted WMS data source parameters.
    pub uri: String,
}

/// GetCapabilities URL of a scenario or raster endpoint.
pub fn capabilities_url(wms_url: &str, kind: ItemKind, uuid: &str) -> String {
    format!("{}{}_{}/?request=GetCapabilities", wms_url, kind, uuid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Title,
    Crs,
    Dimension,
    ServiceException,
}

impl Field {
    fn from_tag(local_name: &[u8]) -> Option<Self> {
        match local_name {
            b"Name" => Some(Field::Name),
            b"Title" => Some(Field::Title),
            b"CRS" => Some(Field::Crs),
            b"Dimension" => Some(Field::Dimension),
            b"ServiceException" => Some(Field::ServiceException),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct LayerElements {
    name: Option<String>,
    title: Option<String>,
    crs: Option<String>,
    /// First `Dimension` descendant: its `name` attribute and extent.
    dimension: Option<(String, String)>,
    style: bool,
}

impl LayerElements {
    fn slot(&mut self, field: Field) -> Option<&mut Option<String>> {
        match field {
            Field::Name => Some(&mut self.name),
            Field::Title => Some(&mut self.title),
            Field::Crs => Some(&mut self.crs),
            Field::Dimension | Field::ServiceException => None,
        }
    }
}

/// Text element being read and the layers it belongs to.
struct Capture {
    field: Field,
    layers: Vec<usize>,
    text: String,
}

/// Build one data source URI per layer below the group layer.
///
/// Every layer takes the first `Name`, `Title`, `CRS`, `Dimension` and
/// `Style` found among its descendants, in document order. A document
/// without any `Layer` is treated as a service exception report.
pub fn layer_uris(xml: &str, wms_url: &str, authcfg: Option<&str>) -> WmsResult<Vec<WmsLayerUri>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut layers: Vec<LayerElements> = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut capture: Option<Capture> = None;
    let mut exception: Option<String> = None;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| WmsError::Xml {
            position: reader.buffer_position(),
            message: e.to_string(),
        })?;
        match event {
            Event::Start(e) => {
                let local_name = e.local_name();
                if local_name.as_ref() == b"Layer" {
                    open.push(layers.len());
                    layers.push(LayerElements::default());
                } else if local_name.as_ref() == b"Style" {
                    mark_style(&mut layers, &open);
                } else if let Some(field) = Field::from_tag(local_name.as_ref()) {
                    capture = start_capture(field, &e, &mut layers, &open, exception.is_none());
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"Style" => mark_style(&mut layers, &open),
                b"Layer" => layers.push(LayerElements::default()),
                b"Dimension" => {
                    start_capture(Field::Dimension, &e, &mut layers, &open, false);
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some(capture) = capture.as_mut() {
                    let text = t.unescape().map_err(|e| WmsError::Xml {
                        position: reader.buffer_position(),
                        message: e.to_string(),
                    })?;
                    capture.text.push_str(&text);
                }
            }
            Event::End(e) => {
                let local_name = e.local_name();
                if local_name.as_ref() == b"Layer" {
                    open.pop();
                } else if let Some(field) = Field::from_tag(local_name.as_ref()) {
                    if capture.as_ref().map(|c| c.field) == Some(field) {
                        if let Some(done) = capture.take() {
                            finish_capture(done, &mut layers, &mut exception);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if layers.is_empty() {
        let details = exception.unwrap_or_else(|| EXCEPTION_NOT_FOUND.to_string());
        return Err(WmsError::ServiceException(
            details.replace("detail:", "").trim().to_string(),
        ));
    }

    let authcfg_parameter = authcfg
        .filter(|id| !id.is_empty())
        .map(|id| format!("authcfg={}", id));

    layers
        .into_iter()
        .skip(1)
        .map(|layer| layer_uri(layer, wms_url, authcfg_parameter.as_deref()))
        .collect()
}

fn mark_style(layers: &mut [LayerElements], open: &[usize]) {
    for &index in open {
        layers[index].style = true;
    }
}

fn start_capture(
    field: Field,
    element: &BytesStart<'_>,
    layers: &mut [LayerElements],
    open: &[usize],
    capture_exception: bool,
) -> Option<Capture> {
    let targets: Vec<usize> = match field {
        Field::ServiceException => {
            return capture_exception.then(|| Capture {
                field,
                layers: Vec::new(),
                text: String::new(),
            });
        }
        Field::Dimension => {
            let name = element
                .attributes()
                .flatten()
                .find(|attr| attr.key.local_name().as_ref() == b"name")
                .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
                .unwrap_or_default();
            let targets: Vec<usize> = open
                .iter()
                .copied()
                .filter(|&i| layers[i].dimension.is_none())
                .collect();
            for &index in &targets {
                layers[index].dimension = Some((name.clone(), String::new()));
            }
            targets
        }
        _ => open
            .iter()
            .copied()
            .filter(|&i| layers[i].slot(field).map_or(false, |slot| slot.is_none()))
            .collect(),
    };

    if targets.is_empty() {
        None
    } else {
        Some(Capture {
            field,
            layers: targets,
            text: String::new(),
        })
    }
}

fn finish_capture(capture: Capture, layers: &mut [LayerElements], exception: &mut Option<String>) {
    match capture.field {
        Field::ServiceException => *exception = Some(capture.text),
        Field::Dimension => {
            for index in capture.layers {
                if let Some((_, extent)) = layers[index].dimension.as_mut() {
                    *extent = capture.text.trim().to_string();
                }
            }
        }
        field => {
            for index in capture.layers {
                if let Some(slot) = layers[index].slot(field) {
                    *slot = Some(capture.text.clone());
                }
            }
        }
    }
}

fn layer_uri(
    layer: LayerElements,
    wms_url: &str,
    authcfg_parameter: Option<&str>,
) -> WmsResult<WmsLayerUri> {
    let name = layer.name.ok_or_else(|| WmsError::MissingElement {
        layer: layer.title.clone().unwrap_or_default(),
        element: "Name",
    })?;
    let crs = layer.crs.ok_or_else(|| WmsError::MissingElement {
        layer: name.clone(),
        element: "CRS",
    })?;

    let mut parameters = vec![
        format!("url={}", wms_url),
        format!("layers={}", name),
        format!("crs={}", crs),
    ];
    if let Some((dimension, extent)) = &layer.dimension {
        if dimension == "time" {
            parameters.push("allowTemporalUpdates=true".to_string());
            parameters.push("type=wmst".to_string());
            parameters.push(format!("timeDimensionExtent={}", extent));
        }
    }
    if layer.style {
        parameters.push("styles".to_string());
    }
    if let Some(authcfg) = authcfg_parameter {
        parameters.push(authcfg.to_string());
    }
    parameters.sort();

    Ok(WmsLayerUri {
        title: layer.title.unwrap_or_else(|| name.clone()),
        uri: parameters.join("&"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_url() {
        assert_eq!(
            capabilities_url("https://demo.lizard.net/wms/", ItemKind::Scenario, "abc"),
            "https://demo.lizard.net/wms/scenario_abc/?request=GetCapabilities"
        );
        assert_eq!(
            capabilities_url("https://demo.lizard.net/wms/", ItemKind::Raster, "abc"),
            "https://demo.lizard.net/wms/raster_abc/?request=GetCapabilities"
        );
    }

    #[test]
    fn test_group_layer_skipped() {
        let xml = r#"<WMS_Capabilities><Capability>
            <Layer><Title>Group</Title>
              <Layer><Name>dem</Name><Title>DEM</Title><CRS>EPSG:28992</CRS></Layer>
            </Layer>
        </Capability></WMS_Capabilities>"#;
        let uris = layer_uris(xml, "https://x/wms/", None).unwrap();
        assert_eq!(uris.len(), 1);
        assert_eq!(uris[0].title, "DEM");
        assert_eq!(uris[0].uri, "crs=EPSG:28992&layers=dem&url=https://x/wms/");
    }

    #[test]
    fn test_missing_crs() {
        let xml = "<WMS_Capabilities><Layer><Layer><Name>dem</Name></Layer></Layer></WMS_Capabilities>";
        let err = layer_uris(xml, "https://x/wms/", None).unwrap_err();
        assert!(matches!(err, WmsError::MissingElement { element: "CRS", .. }));
    }
}
