//! Glottis parameter sets in the `<glottis_models>` part of a speaker file.
//!
//! ```text
//! <glottis_models>
//!   <glottis_model type="Triangular glottis" selected="1">
//!     <static_params>
//!       <param index="0" name="..." abbr="..." unit="..." min="..." max="..." default="..." value="..."/>
//!     </static_params>
//!     <control_params> ... </control_params>
//!     <shapes>
//!       <shape name="modal">
//!         <control_param index="0" value="..."/>
//!       </shape>
//!     </shapes>
//!   </glottis_model>
//! </glottis_models>
//! ```
//!
//! Numbers are written in their shortest round-trip form, so reading back a
//! written file restores every value exactly.

use std::io::{self, Write};

use serde::Deserialize;
use tracing::warn;

use crate::glottis::{Glottis, GlottisKind, GlottisModel, GlottisShape};
use crate::param::Param;

mod de;
pub mod markup;

use self::de::{DeserializeError, from_attributes};
use self::markup::{Element, escape, parse_document};

#[derive(Debug, thiserror::Error)]
pub enum SpeakerError {
    #[error("Malformed markup at byte {offset}: {kind}")]
    Markup { offset: usize, kind: String },
    #[error("No <glottis_models> element found")]
    MissingGlottisModels,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A problem that made the reader keep the current value of some field.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpeakerIssue {
    #[error("Unknown glottis model type '{0}'")]
    UnknownModelType(String),
    #[error("The glottis model '{0}' is not available")]
    ModelNotAvailable(String),
    #[error("{list} index {index} is out of range for '{model}'")]
    IndexOutOfRange {
        model: String,
        list: &'static str,
        index: usize,
    },
    #[error("Bad number '{value}' in <{element}>")]
    BadNumber { element: String, value: String },
    #[error("Invalid <{element}>: {message}")]
    InvalidElement { element: String, message: String },
}

impl SpeakerIssue {
    fn from_de(element: &str, e: DeserializeError) -> Self {
        match e {
            DeserializeError::InvalidNumber(value) => Self::BadNumber {
                element: element.to_string(),
                value,
            },
            other => Self::InvalidElement {
                element: element.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlottisReadReport {
    /// Model flagged as selected, if any
    pub selected: Option<GlottisKind>,
    pub issues: Vec<SpeakerIssue>,
}

#[derive(Deserialize)]
struct ModelAttributes<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(default)]
    selected: bool,
}

#[derive(Deserialize)]
struct ValueAttributes {
    index: usize,
    value: f64,
}

#[derive(Deserialize)]
struct ShapeAttributes<'a> {
    name: &'a str,
}

/// Write the glottis models, marking `selected`, indented by `indent` spaces.
pub fn write_glottis_models<W: Write>(
    writer: &mut W,
    models: &[Glottis],
    selected: GlottisKind,
    indent: usize,
) -> io::Result<()> {
    let pad = |n: usize| " ".repeat(indent + n);
    writeln!(writer, "{}<glottis_models>", pad(0))?;
    for model in models {
        let kind = model.kind();
        writeln!(
            writer,
            "{}<glottis_model type=\"{}\" selected=\"{}\">",
            pad(2),
            escape(kind.type_name()),
            u8::from(kind == selected)
        )?;
        let params = model.params();
        for (list, values) in [("static_params", &params.static_params), ("control_params", &params.control_params)] {
            writeln!(writer, "{}<{list}>", pad(4))?;
            for (index, p) in values.iter().enumerate() {
                write_param(writer, &pad(6), index, p)?;
            }
            writeln!(writer, "{}</{list}>", pad(4))?;
        }
        writeln!(writer, "{}<shapes>", pad(4))?;
        for shape in &params.shapes {
            writeln!(writer, "{}<shape name=\"{}\">", pad(6), escape(&shape.name))?;
            for (index, value) in shape.control_param.iter().enumerate() {
                writeln!(writer, "{}<control_param index=\"{index}\" value=\"{value}\"/>", pad(8))?;
            }
            writeln!(writer, "{}</shape>", pad(6))?;
        }
        writeln!(writer, "{}</shapes>", pad(4))?;
        writeln!(writer, "{}</glottis_model>", pad(2))?;
    }
    writeln!(writer, "{}</glottis_models>", pad(0))
}

fn write_param<W: Write>(writer: &mut W, pad: &str, index: usize, p: &Param) -> io::Result<()> {
    writeln!(
        writer,
        "{pad}<param index=\"{index}\" name=\"{}\" abbr=\"{}\" unit=\"{}\" min=\"{}\" max=\"{}\" default=\"{}\" value=\"{}\"/>",
        escape(&p.name),
        escape(&p.abbr),
        escape(&p.unit),
        p.min,
        p.max,
        p.neutral,
        p.x
    )
}

/// Read glottis parameter sets from a speaker document or a bare
/// `<glottis_models>` fragment into the matching entries of `models`.
///
/// Only malformed markup is an error. Everything else is reported as an
/// issue and leaves the affected values untouched.
pub fn read_glottis_models(input: &str, models: &mut [Glottis]) -> Result<GlottisReadReport, SpeakerError> {
    let root = parse_document(input)?;
    let list = root.find("glottis_models").ok_or(SpeakerError::MissingGlottisModels)?;

    let mut report = GlottisReadReport::default();
    for node in list.children_named("glottis_model") {
        let attributes: ModelAttributes = match from_attributes(&node.attributes) {
            Ok(a) => a,
            Err(e) => {
                report.issues.push(SpeakerIssue::from_de(&node.name, e));
                continue;
            }
        };
        let Some(kind) = GlottisKind::from_type_name(attributes.kind) else {
            report.issues.push(SpeakerIssue::UnknownModelType(attributes.kind.to_string()));
            continue;
        };
        let Some(model) = models.iter_mut().find(|m| m.kind() == kind) else {
            report.issues.push(SpeakerIssue::ModelNotAvailable(attributes.kind.to_string()));
            continue;
        };
        if attributes.selected {
            report.selected = Some(kind);
        }
        read_model(node, model, &mut report.issues);
    }

    for issue in &report.issues {
        warn!(%issue, "speaker file");
    }
    Ok(report)
}

fn read_model(node: &Element, model: &mut Glottis, issues: &mut Vec<SpeakerIssue>) {
    let model_name = model.kind().type_name().to_string();
    let params = model.params_mut();

    for (list, values) in [
        ("static_params", &mut params.static_params),
        ("control_params", &mut params.control_params),
    ] {
        let Some(list_node) = node.child(list) else {
            continue;
        };
        for param in list_node.children_named("param") {
            match from_attributes::<ValueAttributes>(&param.attributes) {
                Ok(ValueAttributes { index, value }) => match values.get_mut(index) {
                    Some(p) => p.set(value),
                    None => issues.push(SpeakerIssue::IndexOutOfRange {
                        model: model_name.clone(),
                        list,
                        index,
                    }),
                },
                Err(e) => issues.push(SpeakerIssue::from_de(&param.name, e)),
            }
        }
    }

    let Some(shapes_node) = node.child("shapes") else {
        return;
    };
    let current: Vec<f64> = params.control_params.iter().map(|p| p.x).collect();
    let mut shapes = Vec::new();
    for shape in shapes_node.children_named("shape") {
        let name = match from_attributes::<ShapeAttributes>(&shape.attributes) {
            Ok(a) => a.name.to_string(),
            Err(e) => {
                issues.push(SpeakerIssue::from_de(&shape.name, e));
                continue;
            }
        };
        let mut control_param = current.clone();
        for value in shape.children_named("control_param") {
            match from_attributes::<ValueAttributes>(&value.attributes) {
                Ok(ValueAttributes { index, value }) => match control_param.get_mut(index) {
                    Some(x) => *x = value,
                    None => issues.push(SpeakerIssue::IndexOutOfRange {
                        model: model_name.clone(),
                        list: "shape",
                        index,
                    }),
                },
                Err(e) => issues.push(SpeakerIssue::from_de(&value.name, e)),
            }
        }
        shapes.push(GlottisShape { name, control_param });
    }
    params.shapes = shapes;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_models() -> Vec<Glottis> {
        GlottisKind::ALL.iter().map(|k| Glottis::new(*k)).collect()
    }

    fn to_string(models: &[Glottis], selected: GlottisKind) -> String {
        let mut out = Vec::new();
        write_glottis_models(&mut out, models, selected, 2).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn round_trip_is_exact() {
        let mut models = all_models();
        // Values without a short decimal form.
        models[0].params_mut().static_params[0].set(1.0 + 0.1 + 0.2);
        models[1].params_mut().control_params[0].set(100.0 + 1.0 / 3.0);
        models[2].params_mut().shapes[0].control_param[2] = 1.0e-7 / 3.0;
        let text = format!("<speaker>\n{}</speaker>\n", to_string(&models, GlottisKind::TwoMass));

        let mut restored = all_models();
        let report = read_glottis_models(&text, &mut restored).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.selected, Some(GlottisKind::TwoMass));
        for (a, b) in models.iter().zip(&restored) {
            assert_eq!(a.params().static_params, b.params().static_params);
            assert_eq!(a.params().control_params, b.params().control_params);
            assert_eq!(a.params().shapes, b.params().shapes);
        }
    }

    #[test]
    fn issues_keep_defaults() {
        let text = r#"
<glottis_models>
  <glottis_model type="Vibrating string" selected="0"/>
  <glottis_model type="Geometric glottis" selected="1">
    <static_params>
      <param index="0" value="abc"/>
      <param index="99" value="1"/>
    </static_params>
  </glottis_model>
</glottis_models>"#;
        let mut models = all_models();
        let before = models[0].params().static_params.clone();
        let report = read_glottis_models(text, &mut models).unwrap();
        assert_eq!(report.selected, Some(GlottisKind::Geometric));
        assert_eq!(report.issues.len(), 3);
        assert_eq!(report.issues[0], SpeakerIssue::UnknownModelType("Vibrating string".to_string()));
        assert!(matches!(&report.issues[1], SpeakerIssue::BadNumber { value, .. } if value == "abc"));
        assert!(matches!(report.issues[2], SpeakerIssue::IndexOutOfRange { index: 99, .. }));
        assert_eq!(models[0].params().static_params, before);
    }

    #[test]
    fn missing_section_and_bad_markup() {
        let mut models = all_models();
        assert!(matches!(
            read_glottis_models("<speaker></speaker>", &mut models),
            Err(SpeakerError::MissingGlottisModels)
        ));
        assert!(matches!(
            read_glottis_models("<glottis_models><glottis_model>", &mut models),
            Err(SpeakerError::Markup { .. })
        ));
    }
}
