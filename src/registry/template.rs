use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("placeholder '{{{0}}}' is not supported here")]
    UnsupportedPlaceholder(&'static str),
    #[error("unbalanced braces at byte {0}")]
    UnbalancedBraces(usize),
    #[error("missing required placeholder '{{{0}}}'")]
    MissingPlaceholder(&'static str),
    #[error("template is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    ProcessId,
    Partition,
    Reason,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "processId" => Some(Placeholder::ProcessId),
            "partition" => Some(Placeholder::Partition),
            "reason" => Some(Placeholder::Reason),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::ProcessId => "processId",
            Placeholder::Partition => "partition",
            Placeholder::Reason => "reason",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// Values substituted into a [`PathTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub process_id: &'a str,
    pub partition: &'a str,
    pub reason: Option<&'a str>,
}

/// A parsed output or error path template.
///
/// Templates always carry `{processId}` so two processes can never resolve to
/// the same location. When `{partition}` is absent it is appended as the last
/// path segment on render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn output(raw: &str) -> Result<Self, TemplateError> {
        Self::parse(raw, &[Placeholder::ProcessId, Placeholder::Partition])
    }

    pub fn error(raw: &str) -> Result<Self, TemplateError> {
        Self::parse(
            raw,
            &[
                Placeholder::ProcessId,
                Placeholder::Reason,
                Placeholder::Partition,
            ],
        )
    }

    fn parse(raw: &str, allowed: &[Placeholder]) -> Result<Self, TemplateError> {
        if raw.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw.char_indices();

        while let Some((idx, ch)) = rest.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in rest.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner == '{' {
                            return Err(TemplateError::UnbalancedBraces(idx));
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBraces(idx));
                    }

                    let placeholder = Placeholder::from_name(&name)
                        .ok_or_else(|| TemplateError::UnknownPlaceholder(name.clone()))?;
                    if !allowed.contains(&placeholder) {
                        return Err(TemplateError::UnsupportedPlaceholder(placeholder.name()));
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(placeholder));
                }
                '}' => return Err(TemplateError::UnbalancedBraces(idx)),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let template = Self {
            raw: raw.to_string(),
            segments,
        };
        if !template.contains(Placeholder::ProcessId) {
            return Err(TemplateError::MissingPlaceholder(
                Placeholder::ProcessId.name(),
            ));
        }
        Ok(template)
    }

    pub fn contains(&self, placeholder: Placeholder) -> bool {
        self.segments
            .iter()
            .any(|segment| *segment == Segment::Slot(placeholder))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn render(&self, vars: &TemplateVars<'_>) -> String {
        let mut out = String::with_capacity(self.raw.len() + vars.partition.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Placeholder::ProcessId) => out.push_str(vars.process_id),
                Segment::Slot(Placeholder::Partition) => out.push_str(vars.partition),
                Segment::Slot(Placeholder::Reason) => {
                    out.push_str(vars.reason.unwrap_or("unknown"));
                }
            }
        }

        if !self.contains(Placeholder::Partition) {
            while out.ends_with('/') {
                out.pop();
            }
            out.push('/');
            out.push_str(vars.partition);
        }
        out
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(reason: Option<&'a str>) -> TemplateVars<'a> {
        TemplateVars {
            process_id: "orders",
            partition: "2026/10/18/14/1760796301123-000000",
            reason,
        }
    }

    #[test]
    fn test_output_template_renders_placeholders() {
        let template = PathTemplate::output("processed/{processId}/{partition}.jsonl").unwrap();
        assert_eq!(
            template.render(&vars(None)),
            "processed/orders/2026/10/18/14/1760796301123-000000.jsonl"
        );
    }

    #[test]
    fn test_partition_appended_when_absent() {
        let template = PathTemplate::output("processed/{processId}/").unwrap();
        assert_eq!(
            template.render(&vars(None)),
            "processed/orders/2026/10/18/14/1760796301123-000000"
        );
    }

    #[test]
    fn test_error_template_renders_reason() {
        let template = PathTemplate::error("errors/{processId}/{reason}").unwrap();
        assert_eq!(
            template.render(&vars(Some("validation"))),
            "errors/orders/validation/2026/10/18/14/1760796301123-000000"
        );
    }

    #[test]
    fn test_rejects_reason_in_output_template() {
        assert_eq!(
            PathTemplate::output("out/{processId}/{reason}"),
            Err(TemplateError::UnsupportedPlaceholder("reason"))
        );
    }

    #[test]
    fn test_rejects_unknown_and_unbalanced() {
        assert_eq!(
            PathTemplate::output("out/{processId}/{bucket}"),
            Err(TemplateError::UnknownPlaceholder("bucket".to_string()))
        );
        assert!(matches!(
            PathTemplate::output("out/{processId"),
            Err(TemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            PathTemplate::output("out/processId}"),
            Err(TemplateError::UnbalancedBraces(_))
        ));
    }

    #[test]
    fn test_requires_process_id() {
        assert_eq!(
            PathTemplate::output("out/{partition}"),
            Err(TemplateError::MissingPlaceholder("processId"))
        );
        assert_eq!(PathTemplate::error("   "), Err(TemplateError::Empty));
    }
}
