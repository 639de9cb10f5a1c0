use crate::error::FrameResult;
use crate::frame_service::FrameService;
use crate::record_gateway::Frame;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Query parameter carrying the frame id in direct links
pub const FRAME_PARAM: &str = "frame";

/// What a visitor handed us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupInput {
    /// Text decoded from a QR code: a direct link or a bare id
    Scanned(String),
    /// Query string of the page the visitor opened, with or without `?`
    QueryString(String),
}

/// Extract a frame id from a scanned payload or a query string
///
/// A `frame` parameter wins wherever it appears. Otherwise a scanned payload
/// is taken verbatim and a query string yields nothing. Blank input yields
/// nothing.
pub fn resolve_identifier(input: &LookupInput) -> Option<String> {
    let identifier = match input {
        LookupInput::Scanned(payload) => {
            let payload = payload.trim();
            Url::parse(payload)
                .ok()
                .and_then(|url| frame_param(url.query_pairs()))
                .unwrap_or_else(|| payload.to_string())
        }
        LookupInput::QueryString(query) => {
            let query = query.trim().trim_start_matches('?');
            frame_param(url::form_urlencoded::parse(query.as_bytes()))?
        }
    };

    if identifier.is_empty() {
        None
    } else {
        Some(identifier)
    }
}

fn frame_param<'a>(
    mut pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
) -> Option<String> {
    pairs
        .find(|(key, _)| key == FRAME_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Direct link for a frame: `{share_base_url}?frame={id}`
///
/// This is the text encoded into a frame's QR code.
pub fn direct_link(share_base_url: &str, frame_id: i64) -> String {
    match Url::parse(share_base_url) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair(FRAME_PARAM, &frame_id.to_string());
            url.to_string()
        }
        Err(_) => format!("{share_base_url}?{FRAME_PARAM}={frame_id}"),
    }
}

/// Turns QR and URL payloads into frames
pub struct LookupResolver {
    frames: Arc<FrameService>,
}

impl LookupResolver {
    pub fn new(frames: Arc<FrameService>) -> Self {
        Self { frames }
    }

    /// Resolve the payload and fetch the frame it names
    ///
    /// `Ok(None)` when the payload names no frame, including blank payloads.
    #[instrument(skip(self))]
    pub async fn open(&self, input: &LookupInput) -> FrameResult<Option<Frame>> {
        let Some(identifier) = resolve_identifier(input) else {
            debug!("Payload carries no frame identifier");
            metrics::counter!("memoryframe.lookups", "outcome" => "not_found").increment(1);
            return Ok(None);
        };

        let frame = self.frames.get_frame_for_display(&identifier).await?;

        let outcome = if frame.is_some() { "found" } else { "not_found" };
        metrics::counter!("memoryframe.lookups", "outcome" => outcome).increment(1);
        debug!(identifier = %identifier, outcome, "Lookup resolved");

        Ok(frame)
    }
}
