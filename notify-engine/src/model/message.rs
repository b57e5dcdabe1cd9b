//! Rendered message and the per-channel dispatch payload.

use notify_params::Params;
use serde::{Deserialize, Serialize};

use crate::render::RenderError;

const SUBJECT: &str = "Subject";

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Html,
}

/// A rendered, channel-agnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub subject: String,
    pub body: String,
}

impl Message {
    pub fn new(kind: MessageKind, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Parse rendered template output.
    ///
    /// The format is a header block of `Name: value` lines, a blank line and
    /// the body. `Subject` is the only known header and it is required.
    /// Leading blank body lines are dropped; the body must not be empty.
    pub fn parse(raw: &str, kind: MessageKind) -> Result<Self, RenderError> {
        let mut subject = None;
        let mut lines = raw.lines();

        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RenderError::Malformed(format!("illegal header line: {line}")))?;
            match name.trim() {
                SUBJECT => subject = Some(value.trim().to_string()),
                other => {
                    return Err(RenderError::Malformed(format!("unknown header: {other}")));
                }
            }
        }

        let subject =
            subject.ok_or_else(|| RenderError::Malformed(format!("missing header: {SUBJECT}")))?;

        let body = lines
            .skip_while(|line| line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let body = body.trim_end().to_string();
        if body.is_empty() {
            return Err(RenderError::Malformed("empty body".to_string()));
        }

        Ok(Self {
            kind,
            subject,
            body,
        })
    }
}

/// Payload handed to a push channel: the rendered message plus the merged
/// parameters used to render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub message: Message,
    pub params: Params,
}

impl Dispatch {
    pub fn new(message: Message, params: Params) -> Self {
        Self { message, params }
    }
}
