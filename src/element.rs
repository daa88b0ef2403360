//! Element handles and the low-level action engine
//!
//! Pointer actions resolve the element's center from its bounding rect and
//! go through the Input domain so the page sees trusted events; state
//! checks and text operations run as functions on the remote node.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::cdp::types::{
    CallArgument, DispatchKeyEvent, DispatchMouseEvent, DispatchTouchEvent, RemoteObjectId,
    TouchPoint,
};
use crate::context::{ExecutionContext, JsHandle};
use crate::error::{Error, Result};

/// DOM states a selector can be waited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomElementState {
    #[default]
    Attached,
    Detached,
    Visible,
    Hidden,
}

/// Center of an element's bounding rect in viewport coordinates
#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Handle to a DOM element inside an execution context
pub struct ElementHandle {
    context: Arc<ExecutionContext>,
    object_id: RemoteObjectId,
}

impl ElementHandle {
    pub fn new(context: Arc<ExecutionContext>, object_id: RemoteObjectId) -> Self {
        Self { context, object_id }
    }

    /// Wrap a handle whose remote object is a DOM node
    pub fn from_handle(handle: JsHandle) -> Result<Self> {
        if !handle.is_element() {
            return Err(Error::Evaluation("handle does not point at a DOM node".into()));
        }
        let object_id = handle
            .object_id()
            .cloned()
            .ok_or_else(|| Error::Evaluation("node handle carries no object id".into()))?;
        Ok(Self::new(handle.context().clone(), object_id))
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn object_id(&self) -> &RemoteObjectId {
        &self.object_id
    }

    async fn call_value(&self, declaration: &str, args: Vec<CallArgument>) -> Result<Value> {
        self.context
            .call_function_on_value(&self.object_id, declaration, args)
            .await
    }

    async fn call_handle(&self, declaration: &str, args: Vec<CallArgument>) -> Result<JsHandle> {
        self.context
            .call_function_on_handle(&self.object_id, declaration, args)
            .await
    }

    fn value_arg(value: Value) -> CallArgument {
        CallArgument {
            value: Some(value),
            object_id: None,
        }
    }

    /// First descendant matching `selector`; with `strict`, more than one
    /// match is an error
    pub async fn query(&self, selector: &str, strict: bool) -> Result<Option<ElementHandle>> {
        let handle = self
            .call_handle(
                r#"function(selector, strict) {
                    const matches = this.querySelectorAll(selector);
                    if (strict && matches.length > 1) {
                        throw new Error('strict mode violation: selector resolved to ' + matches.length + ' elements');
                    }
                    return matches[0] || null;
                }"#,
                vec![Self::value_arg(json!(selector)), Self::value_arg(json!(strict))],
            )
            .await?;
        if handle.object_id().is_none() {
            return Ok(None);
        }
        Ok(Some(ElementHandle::from_handle(handle)?))
    }

    /// All descendants matching `selector`
    pub async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let count = self
            .call_value(
                "function(selector) { return this.querySelectorAll(selector).length; }",
                vec![Self::value_arg(json!(selector))],
            )
            .await?
            .as_u64()
            .unwrap_or(0);

        let mut elements = Vec::with_capacity(count as usize);
        for index in 0..count {
            let handle = self
                .call_handle(
                    "function(selector, index) { return this.querySelectorAll(selector)[index] || null; }",
                    vec![Self::value_arg(json!(selector)), Self::value_arg(json!(index))],
                )
                .await?;
            if handle.object_id().is_some() {
                elements.push(ElementHandle::from_handle(handle)?);
            }
        }
        Ok(elements)
    }

    /// Whether a descendant matching `selector` satisfies `state` right now.
    /// Detached/hidden states are satisfied by absence.
    pub async fn selector_satisfies(
        &self,
        selector: &str,
        state: DomElementState,
        strict: bool,
    ) -> Result<Option<ElementHandle>> {
        let found = self.query(selector, strict).await?;
        match state {
            DomElementState::Attached => Ok(found),
            DomElementState::Detached => match found {
                None => {
                    // absence has no handle to return; callers treat the
                    // document itself as the witness
                    Ok(Some(ElementHandle::new(
                        self.context.clone(),
                        self.object_id.clone(),
                    )))
                }
                Some(_) => Ok(None),
            },
            DomElementState::Visible => match found {
                Some(el) if el.is_visible().await? => Ok(Some(el)),
                _ => Ok(None),
            },
            DomElementState::Hidden => match found {
                None => Ok(Some(ElementHandle::new(
                    self.context.clone(),
                    self.object_id.clone(),
                ))),
                Some(el) => {
                    if el.is_hidden().await? {
                        Ok(Some(el))
                    } else {
                        Ok(None)
                    }
                }
            },
        }
    }

    // -- geometry -----------------------------------------------------------

    pub async fn scroll_into_view_if_needed(&self) -> Result<()> {
        self.call_value(
            "function() { this.scrollIntoView({block: 'center', inline: 'center'}); }",
            vec![],
        )
        .await?;
        Ok(())
    }

    /// Viewport-space center of the bounding rect
    pub async fn clickable_point(&self) -> Result<Position> {
        let rect = self
            .call_value(
                r#"function() {
                    const r = this.getBoundingClientRect();
                    return {x: r.x, y: r.y, width: r.width, height: r.height};
                }"#,
                vec![],
            )
            .await?;
        let x = rect["x"].as_f64().unwrap_or(0.0);
        let y = rect["y"].as_f64().unwrap_or(0.0);
        let width = rect["width"].as_f64().unwrap_or(0.0);
        let height = rect["height"].as_f64().unwrap_or(0.0);
        if width <= 0.0 || height <= 0.0 {
            return Err(Error::ElementNotFound("element has no visible box".into()));
        }
        Ok(Position {
            x: x + width / 2.0,
            y: y + height / 2.0,
        })
    }

    // -- pointer actions ----------------------------------------------------

    async fn mouse_event(&self, event_type: &str, p: Position, click_count: i64) -> Result<()> {
        self.context
            .session()
            .execute::<_, Value>(
                "Input.dispatchMouseEvent",
                &DispatchMouseEvent {
                    event_type: event_type.to_string(),
                    x: p.x,
                    y: p.y,
                    button: Some("left".to_string()),
                    click_count: Some(click_count),
                },
            )
            .await?;
        Ok(())
    }

    async fn click_at(&self, p: Position, click_count: i64) -> Result<()> {
        self.mouse_event("mouseMoved", p, 0).await?;
        self.mouse_event("mousePressed", p, click_count).await?;
        self.mouse_event("mouseReleased", p, click_count).await?;
        Ok(())
    }

    pub async fn click(&self) -> Result<()> {
        self.scroll_into_view_if_needed().await?;
        let p = self.clickable_point().await?;
        self.click_at(p, 1).await
    }

    pub async fn dblclick(&self) -> Result<()> {
        self.scroll_into_view_if_needed().await?;
        let p = self.clickable_point().await?;
        self.click_at(p, 1).await?;
        self.click_at(p, 2).await
    }

    pub async fn hover(&self) -> Result<()> {
        self.scroll_into_view_if_needed().await?;
        let p = self.clickable_point().await?;
        self.mouse_event("mouseMoved", p, 0).await
    }

    pub async fn tap(&self) -> Result<()> {
        self.scroll_into_view_if_needed().await?;
        let p = self.clickable_point().await?;
        for event_type in ["touchStart", "touchEnd"] {
            self.context
                .session()
                .execute::<_, Value>(
                    "Input.dispatchTouchEvent",
                    &DispatchTouchEvent {
                        event_type: event_type.to_string(),
                        touch_points: if event_type == "touchStart" {
                            vec![TouchPoint { x: p.x, y: p.y }]
                        } else {
                            vec![]
                        },
                    },
                )
                .await?;
        }
        Ok(())
    }

    pub async fn set_checked(&self, checked: bool) -> Result<()> {
        if self.is_checked().await? == checked {
            return Ok(());
        }
        self.click().await?;
        if self.is_checked().await? != checked {
            return Err(Error::Evaluation("clicking the checkbox did not change its state".into()));
        }
        Ok(())
    }

    // -- keyboard -----------------------------------------------------------

    async fn key_event(&self, event: DispatchKeyEvent) -> Result<()> {
        self.context
            .session()
            .execute::<_, Value>("Input.dispatchKeyEvent", &event)
            .await?;
        Ok(())
    }

    /// Press a single named key on the focused element
    pub async fn press(&self, key: &str) -> Result<()> {
        self.focus().await?;
        self.key_event(DispatchKeyEvent {
            event_type: "keyDown".to_string(),
            key: Some(key.to_string()),
            text: single_char_text(key),
        })
        .await?;
        self.key_event(DispatchKeyEvent {
            event_type: "keyUp".to_string(),
            key: Some(key.to_string()),
            text: None,
        })
        .await
    }

    /// Type text into the focused element, one character at a time
    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.focus().await?;
        for ch in text.chars() {
            self.key_event(DispatchKeyEvent {
                event_type: "char".to_string(),
                key: None,
                text: Some(ch.to_string()),
            })
            .await?;
        }
        Ok(())
    }

    // -- content ------------------------------------------------------------

    pub async fn focus(&self) -> Result<()> {
        self.call_value("function() { this.focus(); }", vec![]).await?;
        Ok(())
    }

    pub async fn fill(&self, value: &str) -> Result<()> {
        self.call_value(
            r#"function(value) {
                this.focus();
                if ('value' in this) {
                    this.value = value;
                } else if (this.isContentEditable) {
                    this.textContent = value;
                } else {
                    throw new Error('element is not fillable');
                }
                this.dispatchEvent(new Event('input', {bubbles: true}));
                this.dispatchEvent(new Event('change', {bubbles: true}));
            }"#,
            vec![Self::value_arg(json!(value))],
        )
        .await?;
        Ok(())
    }

    /// Select the options whose value or label is in `values`; returns the
    /// values actually selected
    pub async fn select_option(&self, values: &[String]) -> Result<Vec<String>> {
        let selected = self
            .call_value(
                r#"function(values) {
                    if (this.tagName !== 'SELECT') {
                        throw new Error('element is not a <select>');
                    }
                    for (const option of this.options) {
                        option.selected = values.includes(option.value) || values.includes(option.label);
                    }
                    this.dispatchEvent(new Event('input', {bubbles: true}));
                    this.dispatchEvent(new Event('change', {bubbles: true}));
                    return [...this.options].filter(o => o.selected).map(o => o.value);
                }"#,
                vec![Self::value_arg(json!(values))],
            )
            .await?;
        Ok(serde_json::from_value(selected)?)
    }

    pub async fn dispatch_event(&self, event_type: &str, detail: Option<Value>) -> Result<()> {
        self.call_value(
            r#"function(type, detail) {
                const event = detail === null
                    ? new Event(type, {bubbles: true, cancelable: true})
                    : new CustomEvent(type, {bubbles: true, cancelable: true, detail});
                this.dispatchEvent(event);
            }"#,
            vec![
                Self::value_arg(json!(event_type)),
                Self::value_arg(detail.unwrap_or(Value::Null)),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .call_value(
                "function(name) { return this.getAttribute(name); }",
                vec![Self::value_arg(json!(name))],
            )
            .await?;
        Ok(value.as_str().map(String::from))
    }

    pub async fn inner_html(&self) -> Result<String> {
        let value = self.call_value("function() { return this.innerHTML; }", vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn inner_text(&self) -> Result<String> {
        let value = self.call_value("function() { return this.innerText; }", vec![]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn text_content(&self) -> Result<Option<String>> {
        let value = self
            .call_value("function() { return this.textContent; }", vec![])
            .await?;
        Ok(value.as_str().map(String::from))
    }

    pub async fn input_value(&self) -> Result<String> {
        let value = self
            .call_value(
                r#"function() {
                    if (!('value' in this)) throw new Error('element carries no value');
                    return String(this.value);
                }"#,
                vec![],
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    // -- state checks -------------------------------------------------------

    pub async fn is_visible(&self) -> Result<bool> {
        let value = self
            .call_value(
                r#"function() {
                    const style = getComputedStyle(this);
                    if (style.visibility === 'hidden' || style.display === 'none') return false;
                    const rect = this.getBoundingClientRect();
                    return rect.width > 0 && rect.height > 0;
                }"#,
                vec![],
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn is_hidden(&self) -> Result<bool> {
        Ok(!self.is_visible().await?)
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        let value = self
            .call_value(
                r#"function() {
                    const formLike = this.matches('button, input, select, textarea, optgroup, option');
                    return !(formLike && this.hasAttribute('disabled'));
                }"#,
                vec![],
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn is_disabled(&self) -> Result<bool> {
        Ok(!self.is_enabled().await?)
    }

    pub async fn is_editable(&self) -> Result<bool> {
        let value = self
            .call_value(
                r#"function() {
                    if (this.isContentEditable) return true;
                    if (!this.matches('input, textarea, select')) return false;
                    return !this.disabled && !this.readOnly;
                }"#,
                vec![],
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn is_checked(&self) -> Result<bool> {
        let value = self
            .call_value("function() { return !!this.checked; }", vec![])
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Release the remote node
    pub async fn dispose(&self) {
        self.context
            .session()
            .execute_fire_and_forget(
                "Runtime.releaseObject",
                &crate::cdp::types::ReleaseObject {
                    object_id: self.object_id.clone(),
                },
            )
            .await;
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("context", &self.context.id())
            .field("object_id", &self.object_id)
            .finish()
    }
}

fn single_char_text(key: &str) -> Option<String> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Some(ch.to_string()),
        _ => None,
    }
}
