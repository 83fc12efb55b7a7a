//! Element access inside the portal's nested frames over CDP.
//!
//! Lookups are JavaScript evaluated in the execution context of the target
//! frame, which is found by walking the frame tree by frame name. A found
//! element stays a remote object: clicks and focus go through
//! `Runtime.callFunctionOn`, text through `Input.insertText` and files
//! through `DOM.setFileInputFiles`.

use std::fmt;
use std::path::Path;

use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::InsertTextParams;
use chromiumoxide::cdp::js_protocol::runtime::{
    CallFunctionOnParams, EvaluateParams, ExceptionDetails, ExecutionContextId, RemoteObjectId,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use serde_json::Value;

use crate::domain::SubmitError;

const CLICK_JS: &str = "function() { this.scrollIntoView({block: 'center'}); this.click(); }";
const FOCUS_AND_CLEAR_JS: &str = "function() { this.focus(); if ('value' in this) { this.value = ''; } }";
const CHANGED_JS: &str =
    "function() { this.dispatchEvent(new Event('change', {bubbles: true})); }";

/// How to find an element within one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    XPath(String),
    Css(String),
}

impl Locator {
    pub fn id(id: impl Into<String>) -> Self {
        Locator::Id(id.into())
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Locator::XPath(xpath.into())
    }

    pub fn css(css: impl Into<String>) -> Self {
        Locator::Css(css.into())
    }

    /// Element whose text contains `text`.
    pub fn containing_text(text: &str) -> Self {
        Locator::XPath(format!("//*[contains(text(), {})]", xpath_literal(text)))
    }

    /// JavaScript expression yielding the element or `null`.
    pub fn lookup_js(&self) -> String {
        match self {
            Locator::Id(id) => format!("document.getElementById({})", js_string(id)),
            Locator::Css(css) => format!("document.querySelector({})", js_string(css)),
            Locator::XPath(xpath) => format!(
                "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                js_string(xpath)
            ),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "id={id}"),
            Locator::XPath(xpath) => write!(f, "xpath={xpath}"),
            Locator::Css(css) => write!(f, "css={css}"),
        }
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// XPath 1.0 string literal for any text; XPath has no escapes, so text
/// holding both quote kinds is spliced together with `concat()`.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|part| format!("'{part}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// The document lookups run in: the top page or one (nested) frame.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    context: Option<ExecutionContextId>,
}

impl Scope {
    pub fn top() -> Self {
        Self::default()
    }
}

pub(crate) fn cdp(e: CdpError) -> SubmitError {
    SubmitError::Driver(e.to_string())
}

fn script_error(details: &ExceptionDetails) -> SubmitError {
    let message = details
        .exception
        .as_ref()
        .and_then(|exception| exception.description.clone())
        .unwrap_or_else(|| details.text.clone());
    SubmitError::Driver(message)
}

/// Scope of the frame reached through `path` (frame names, outermost
/// first). `None` while some frame on the path is not attached yet.
pub async fn frame_scope(page: &Page, path: &[&str]) -> Result<Option<Scope>, SubmitError> {
    if path.is_empty() {
        return Ok(Some(Scope::top()));
    }
    let Some(mut parent) = page.mainframe().await.map_err(cdp)? else {
        return Ok(None);
    };
    let frames = page.frames().await.map_err(cdp)?;
    for name in path {
        let mut found = None;
        for frame in &frames {
            if page.frame_parent(frame.clone()).await.map_err(cdp)?.as_ref() != Some(&parent) {
                continue;
            }
            if page.frame_name(frame.clone()).await.map_err(cdp)?.as_deref() == Some(*name) {
                found = Some(frame.clone());
                break;
            }
        }
        match found {
            Some(frame) => parent = frame,
            None => return Ok(None),
        }
    }
    let context = page.frame_execution_context(parent).await.map_err(cdp)?;
    Ok(context.map(|context| Scope {
        context: Some(context),
    }))
}

/// Evaluate the locator once; `None` when nothing matches yet.
pub async fn resolve(
    page: &Page,
    scope: &Scope,
    locator: &Locator,
) -> Result<Option<RemoteObjectId>, SubmitError> {
    let mut params = EvaluateParams::new(locator.lookup_js());
    params.context_id = scope.context.clone();
    params.return_by_value = Some(false);
    let returns = page.execute(params).await.map_err(cdp)?.result;
    if let Some(details) = &returns.exception_details {
        return Err(script_error(details));
    }
    Ok(returns.result.object_id)
}

pub async fn evaluate(page: &Page, scope: &Scope, expression: &str) -> Result<Value, SubmitError> {
    let mut params = EvaluateParams::new(expression);
    params.context_id = scope.context.clone();
    params.return_by_value = Some(true);
    let returns = page.execute(params).await.map_err(cdp)?.result;
    if let Some(details) = &returns.exception_details {
        return Err(script_error(details));
    }
    Ok(returns.result.value.unwrap_or(Value::Null))
}

async fn call_on(page: &Page, element: &RemoteObjectId, function: &str) -> Result<(), SubmitError> {
    let mut params = CallFunctionOnParams::new(function);
    params.object_id = Some(element.clone());
    let returns = page.execute(params).await.map_err(cdp)?.result;
    match &returns.exception_details {
        Some(details) => Err(script_error(details)),
        None => Ok(()),
    }
}

pub async fn click(page: &Page, element: &RemoteObjectId) -> Result<(), SubmitError> {
    call_on(page, element, CLICK_JS).await
}

/// Replace the field's value as if typed, then fire `change`.
pub async fn type_text(page: &Page, element: &RemoteObjectId, text: &str) -> Result<(), SubmitError> {
    call_on(page, element, FOCUS_AND_CLEAR_JS).await?;
    page.execute(InsertTextParams::new(text)).await.map_err(cdp)?;
    call_on(page, element, CHANGED_JS).await
}

pub async fn set_file(page: &Page, input: &RemoteObjectId, file: &Path) -> Result<(), SubmitError> {
    let mut params = SetFileInputFilesParams::new(vec![file.to_string_lossy().into_owned()]);
    params.object_id = Some(input.clone());
    page.execute(params).await.map_err(cdp)?;
    Ok(())
}
