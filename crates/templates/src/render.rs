//! Placeholder substitution and tracking URL construction.

use url::Url;

use crate::context::{RenderContext, TemplateFields};
use crate::error::RenderError;

/// Query parameter carrying the recipient tracking id.
///
/// Setting it rewrites the whole query as `application/x-www-form-urlencoded`:
/// other parameters keep their order but are re-encoded (`%20` becomes `+`),
/// any previous `rid` is dropped, and the new one goes last.
pub const TRACKING_PARAM: &str = "rid";

/// Path segment appended to the campaign URL for the open-tracking pixel.
const TRACK_SEGMENT: &str = "track";

/// Template engine seam.
///
/// Queue entry generation only depends on this trait, so the placeholder
/// engine can be replaced without touching the state machine.
pub trait Renderer: Send + Sync {
    /// Render a single string (also used for header values such as `From`).
    fn render_str(&self, input: &str, ctx: &RenderContext) -> Result<String, RenderError>;

    /// Render subject, text and HTML. Fails as a whole: no partial output.
    fn render(
        &self,
        fields: &TemplateFields,
        ctx: &RenderContext,
    ) -> Result<TemplateFields, RenderError> {
        Ok(TemplateFields {
            subject: self.render_str(&fields.subject, ctx)?,
            text: self.render_str(&fields.text, ctx)?,
            html: self.render_str(&fields.html, ctx)?,
        })
    }
}

/// Default engine: `{{.Name}}` substitution, unknown names kept verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn render_str(&self, input: &str, ctx: &RenderContext) -> Result<String, RenderError> {
        let mut vars = Vars::new(ctx);
        substitute(input, |name| vars.lookup(name))
    }
}

/// Render with the default [`PlaceholderRenderer`].
pub fn render(fields: &TemplateFields, ctx: &RenderContext) -> Result<TemplateFields, RenderError> {
    PlaceholderRenderer.render(fields, ctx)
}

/// URLs derived from the campaign base URL for one recipient.
#[derive(Debug, Clone)]
struct TrackingUrls {
    url: String,
    tracking_url: String,
    base_url: String,
}

impl TrackingUrls {
    fn build(ctx: &RenderContext) -> Result<Self, RenderError> {
        let raw = substitute(&ctx.url, |name| Ok(recipient_value(ctx, name)))?;
        let mut url = Url::parse(&raw).map_err(|e| RenderError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        set_tracking_param(&mut url, ctx.rid.as_str());

        let mut tracking = url.clone();
        let path = format!("{}/{TRACK_SEGMENT}", tracking.path().trim_end_matches('/'));
        tracking.set_path(&path);

        let mut base = url.clone();
        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self {
            url: url.to_string(),
            tracking_url: tracking.to_string(),
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }
}

/// Replace any existing `rid` parameter, keep the others in order.
fn set_tracking_param(url: &mut Url, rid: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != TRACKING_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(TRACKING_PARAM, rid);
}

/// Values that do not depend on the campaign URL.
fn recipient_value(ctx: &RenderContext, name: &str) -> Option<String> {
    let value: &str = match name {
        "RId" => ctx.rid.as_str(),
        "Email" => &ctx.recipient.email,
        "FirstName" => &ctx.recipient.first_name,
        "LastName" => &ctx.recipient.last_name,
        "Position" => &ctx.recipient.position,
        "From" => &ctx.from,
        _ => return None,
    };
    Some(value.to_string())
}

struct Vars<'a> {
    ctx: &'a RenderContext,
    urls: Option<TrackingUrls>,
}

impl<'a> Vars<'a> {
    fn new(ctx: &'a RenderContext) -> Self {
        Self { ctx, urls: None }
    }

    fn lookup(&mut self, name: &str) -> Result<Option<String>, RenderError> {
        if let Some(value) = recipient_value(self.ctx, name) {
            return Ok(Some(value));
        }

        let value = match name {
            "URL" => self.urls()?.url,
            "TrackingURL" => self.urls()?.tracking_url,
            "Tracker" => format!(
                "<img alt='' style='display: none' src='{}'/>",
                self.urls()?.tracking_url
            ),
            "BaseURL" => self.urls()?.base_url,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    // Built lazily: a template that never mentions a URL placeholder must not
    // fail on a campaign URL that does not parse.
    fn urls(&mut self) -> Result<TrackingUrls, RenderError> {
        if let Some(urls) = &self.urls {
            return Ok(urls.clone());
        }
        let urls = TrackingUrls::build(self.ctx)?;
        self.urls = Some(urls.clone());
        Ok(urls)
    }
}

/// Single left-to-right pass over `input`.
///
/// `lookup` returning `Ok(None)` keeps the placeholder text as written.
fn substitute<F>(input: &str, mut lookup: F) -> Result<String, RenderError>
where
    F: FnMut(&str) -> Result<Option<String>, RenderError>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);

        let inner = &rest[start + 2..];
        let Some(end) = inner.find("}}") else {
            return Err(RenderError::Unterminated {
                offset: offset + start,
            });
        };
        let len = start + 2 + end + 2;
        let literal = &rest[start..len];

        match placeholder_name(&inner[..end]) {
            Some(name) => match lookup(name)? {
                Some(value) => out.push_str(&value),
                None => out.push_str(literal),
            },
            None => out.push_str(literal),
        }

        offset += len;
        rest = &rest[len..];
    }

    out.push_str(rest);
    Ok(out)
}

fn placeholder_name(raw: &str) -> Option<&str> {
    let name = raw.trim().strip_prefix('.')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}
