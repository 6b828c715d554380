//! Label expressions and value conversion for exported metrics.
//!
//! Expression forms:
//! - `'text'` literal
//! - `resource.uri`, `resource.class`, `resource.<property>`
//! - `resource.parent.<...>`, repeatable to walk further up
//! - `sample.<field>` and `sample.resource.<...>` inside metric service groups

use dashmap::DashMap;

use crate::MetricDefinition;
use crate::MetricSample;
use crate::PropertyValue;
use crate::RenderError;
use crate::Resource;
use crate::Snapshot;

/// What an expression or value is evaluated against.
#[derive(Clone, Copy)]
pub struct RenderScope<'a> {
    pub snapshot: &'a Snapshot,
    /// Cached resource being exported, or the resource a sample belongs to
    pub resource: Option<&'a Resource>,
    pub sample: Option<&'a MetricSample>,
}

impl<'a> RenderScope<'a> {
    pub fn for_resource(
        snapshot: &'a Snapshot,
        resource: &'a Resource,
    ) -> Self {
        Self {
            snapshot,
            resource: Some(resource),
            sample: None,
        }
    }

    pub fn for_sample(
        snapshot: &'a Snapshot,
        sample: &'a MetricSample,
        resource: Option<&'a Resource>,
    ) -> Self {
        Self {
            snapshot,
            resource,
            sample: Some(sample),
        }
    }
}

/// Renders label values and metric values. Every call is independent, so one
/// failure never affects another label or metric.
pub trait MetricRenderer: Send + Sync + 'static {
    fn label(
        &self,
        expression: &str,
        scope: &RenderScope<'_>,
    ) -> Result<String, RenderError>;

    /// `Ok(None)` when the source value is null.
    fn value(
        &self,
        definition: &MetricDefinition,
        scope: &RenderScope<'_>,
    ) -> Result<Option<f64>, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attribute {
    Uri,
    Class,
    Property(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LabelExpression {
    Literal(String),
    Resource { parents: usize, attribute: Attribute },
    SampleResource { parents: usize, attribute: Attribute },
    SampleField(String),
}

impl LabelExpression {
    pub(crate) fn parse(expression: &str) -> Result<Self, RenderError> {
        let invalid = |reason: &str| RenderError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = expression.trim();

        if let Some(rest) = trimmed.strip_prefix('\'') {
            return match rest.strip_suffix('\'') {
                Some(text) if !text.contains('\'') => Ok(LabelExpression::Literal(text.to_string())),
                _ => Err(invalid("unterminated literal")),
            };
        }

        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty path segment"));
        }
        match segments.as_slice() {
            ["resource", path @ ..] => {
                let (parents, attribute) = Self::resource_path(path).ok_or_else(|| invalid("expected a property after 'resource'"))?;
                Ok(LabelExpression::Resource { parents, attribute })
            }
            ["sample", "resource", path @ ..] => {
                let (parents, attribute) =
                    Self::resource_path(path).ok_or_else(|| invalid("expected a property after 'sample.resource'"))?;
                Ok(LabelExpression::SampleResource { parents, attribute })
            }
            ["sample", field] => Ok(LabelExpression::SampleField(field.to_string())),
            _ => Err(invalid("expected 'resource.', 'sample.' or a quoted literal")),
        }
    }

    fn resource_path(path: &[&str]) -> Option<(usize, Attribute)> {
        let parents = path.iter().take_while(|s| **s == "parent").count();
        match &path[parents..] {
            ["uri"] => Some((parents, Attribute::Uri)),
            ["class"] => Some((parents, Attribute::Class)),
            [property] => Some((parents, Attribute::Property(property.to_string()))),
            _ => None,
        }
    }
}

/// Default renderer for the expression language above. Parsed expressions
/// are cached by their source text.
#[derive(Default)]
pub struct ExpressionRenderer {
    parsed: DashMap<String, Result<LabelExpression, RenderError>>,
}

impl ExpressionRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(
        &self,
        expression: &str,
    ) -> Result<LabelExpression, RenderError> {
        if let Some(cached) = self.parsed.get(expression) {
            return cached.value().clone();
        }
        let parsed = LabelExpression::parse(expression);
        self.parsed.insert(expression.to_string(), parsed.clone());
        parsed
    }

    fn resolve_resource(
        expression: &str,
        scope: &RenderScope<'_>,
        parents: usize,
        attribute: &Attribute,
    ) -> Result<String, RenderError> {
        let mut resource = scope
            .resource
            .ok_or_else(|| RenderError::NotApplicable(expression.to_string()))?;
        for _ in 0..parents {
            resource = scope.snapshot.parent(resource).ok_or_else(|| RenderError::MissingParent {
                uri: resource.uri.to_string(),
            })?;
        }
        match attribute {
            Attribute::Uri => Ok(resource.uri.to_string()),
            Attribute::Class => Ok(resource.class.to_string()),
            Attribute::Property(name) => match resource.property(name) {
                Some(value) if !value.is_null() => Ok(value.to_string()),
                _ => Err(RenderError::MissingProperty {
                    uri: resource.uri.to_string(),
                    property: name.clone(),
                }),
            },
        }
    }
}

impl MetricRenderer for ExpressionRenderer {
    fn label(
        &self,
        expression: &str,
        scope: &RenderScope<'_>,
    ) -> Result<String, RenderError> {
        match self.parse(expression)? {
            LabelExpression::Literal(text) => Ok(text),
            LabelExpression::Resource { parents, attribute } => {
                Self::resolve_resource(expression, scope, parents, &attribute)
            }
            LabelExpression::SampleResource { parents, attribute } => {
                if scope.sample.is_none() {
                    return Err(RenderError::NotApplicable(expression.to_string()));
                }
                Self::resolve_resource(expression, scope, parents, &attribute)
            }
            LabelExpression::SampleField(field) => {
                let sample = scope
                    .sample
                    .ok_or_else(|| RenderError::NotApplicable(expression.to_string()))?;
                match sample.values.get(&field) {
                    Some(value) if !value.is_null() => Ok(value.to_string()),
                    _ => Err(RenderError::MissingProperty {
                        uri: sample_origin(sample),
                        property: field,
                    }),
                }
            }
        }
    }

    fn value(
        &self,
        definition: &MetricDefinition,
        scope: &RenderScope<'_>,
    ) -> Result<Option<f64>, RenderError> {
        let (raw, origin) = match (scope.sample, scope.resource) {
            (Some(sample), _) => (sample.values.get(&definition.source), sample_origin(sample)),
            (None, Some(resource)) => (resource.property(&definition.source), resource.uri.to_string()),
            (None, None) => return Err(RenderError::NotApplicable(definition.source.clone())),
        };
        let raw = raw.ok_or_else(|| RenderError::MissingProperty {
            uri: origin,
            property: definition.source.clone(),
        })?;

        let number = match raw {
            PropertyValue::Null => return Ok(None),
            PropertyValue::Text(text) => map_text(definition, text)?,
            other => other.as_f64().unwrap_or_default(),
        };
        Ok(Some(if definition.percent { number / 100.0 } else { number }))
    }
}

fn sample_origin(sample: &MetricSample) -> String {
    match &sample.resource {
        Some(uri) => uri.to_string(),
        None => format!("metric group {}", sample.group),
    }
}

/// Enum-like strings go through the value map; configuration keys may have
/// been lowercased on load, so a case-insensitive match is tried second.
fn map_text(
    definition: &MetricDefinition,
    text: &str,
) -> Result<f64, RenderError> {
    if let Some(mapped) = definition.value_map.get(text) {
        return Ok(*mapped);
    }
    if let Some((_, mapped)) = definition
        .value_map
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(text))
    {
        return Ok(*mapped);
    }
    text.trim().parse::<f64>().map_err(|_| RenderError::NotNumeric {
        source_name: definition.source.clone(),
        value: text.to_string(),
    })
}
