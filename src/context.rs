//! Execution contexts: handles to JavaScript worlds inside frames

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::cdp::session::Session;
use crate::cdp::types::{
    CallArgument, CallFunctionOn, Evaluate, EvaluateResult, ExecutionContextId, ReleaseObject,
    RemoteObject, RemoteObjectId,
};
use crate::error::{Error, Result};
use crate::frame::Frame;

/// The JavaScript world a context belongs to. "Main" is the page's default
/// world; "utility" is the private world the engine evaluates in to avoid
/// touching page globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum World {
    Main,
    Utility,
}

impl World {
    pub fn as_str(&self) -> &'static str {
        match self {
            World::Main => "main",
            World::Utility => "utility",
        }
    }
}

/// Handle to one JavaScript world inside one frame. Evaluates scripts and
/// returns values or remote-object handles.
pub struct ExecutionContext {
    id: ExecutionContextId,
    session: Arc<Session>,
    frame: Option<Weak<Frame>>,
}

impl ExecutionContext {
    pub fn new(id: ExecutionContextId, session: Arc<Session>, frame: Option<&Arc<Frame>>) -> Self {
        Self {
            id,
            session,
            frame: frame.map(Arc::downgrade),
        }
    }

    pub fn id(&self) -> ExecutionContextId {
        self.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The owning frame, if it is still alive
    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.frame.as_ref().and_then(Weak::upgrade)
    }

    /// Evaluate an expression and return its value
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let reply: EvaluateResult = self
            .session
            .execute(
                "Runtime.evaluate",
                &Evaluate {
                    expression: expression.to_string(),
                    context_id: Some(self.id),
                    return_by_value: true,
                    await_promise: true,
                },
            )
            .await?;
        into_value(reply)
    }

    /// Evaluate an expression and return a handle to the resulting object
    pub async fn evaluate_handle(self: &Arc<Self>, expression: &str) -> Result<JsHandle> {
        let reply: EvaluateResult = self
            .session
            .execute(
                "Runtime.evaluate",
                &Evaluate {
                    expression: expression.to_string(),
                    context_id: Some(self.id),
                    return_by_value: false,
                    await_promise: true,
                },
            )
            .await?;
        into_handle(self, reply)
    }

    /// Call a function with the given arguments inside this context and
    /// return its value
    pub async fn call_function(&self, declaration: &str, args: Vec<CallArgument>) -> Result<Value> {
        let reply: EvaluateResult = self
            .session
            .execute(
                "Runtime.callFunctionOn",
                &CallFunctionOn {
                    function_declaration: declaration.to_string(),
                    object_id: None,
                    execution_context_id: Some(self.id),
                    arguments: args,
                    return_by_value: true,
                    await_promise: true,
                },
            )
            .await?;
        into_value(reply)
    }

    /// Call a function with `object_id` bound as `this`, returning a handle
    pub async fn call_function_on_handle(
        self: &Arc<Self>,
        object_id: &RemoteObjectId,
        declaration: &str,
        args: Vec<CallArgument>,
    ) -> Result<JsHandle> {
        let reply: EvaluateResult = self
            .session
            .execute(
                "Runtime.callFunctionOn",
                &CallFunctionOn {
                    function_declaration: declaration.to_string(),
                    object_id: Some(object_id.clone()),
                    execution_context_id: None,
                    arguments: args,
                    return_by_value: false,
                    await_promise: true,
                },
            )
            .await?;
        into_handle(self, reply)
    }

    /// Call a function with `object_id` bound as `this`, returning its value
    pub async fn call_function_on_value(
        &self,
        object_id: &RemoteObjectId,
        declaration: &str,
        args: Vec<CallArgument>,
    ) -> Result<Value> {
        let reply: EvaluateResult = self
            .session
            .execute(
                "Runtime.callFunctionOn",
                &CallFunctionOn {
                    function_declaration: declaration.to_string(),
                    object_id: Some(object_id.clone()),
                    execution_context_id: None,
                    arguments: args,
                    return_by_value: true,
                    await_promise: true,
                },
            )
            .await?;
        into_value(reply)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext").field("id", &self.id).finish()
    }
}

fn check_exception(reply: &EvaluateResult) -> Result<()> {
    if let Some(details) = &reply.exception_details {
        return Err(Error::Evaluation(details.message()));
    }
    Ok(())
}

fn into_value(reply: EvaluateResult) -> Result<Value> {
    check_exception(&reply)?;
    Ok(parse_remote_object(&reply.result))
}

fn into_handle(context: &Arc<ExecutionContext>, reply: EvaluateResult) -> Result<JsHandle> {
    check_exception(&reply)?;
    Ok(JsHandle::new(context.clone(), reply.result))
}

/// Extract the best local value from a remote object: the serialized value
/// if present, the unserializable token (`NaN`, `Infinity`, `-0`) as a
/// string, otherwise the description.
pub fn parse_remote_object(obj: &RemoteObject) -> Value {
    if let Some(value) = &obj.value {
        return value.clone();
    }
    if let Some(unserializable) = &obj.unserializable_value {
        return Value::String(unserializable.clone());
    }
    match &obj.description {
        Some(description) => Value::String(description.clone()),
        None => Value::Null,
    }
}

/// Handle to a remote JavaScript object
pub struct JsHandle {
    context: Arc<ExecutionContext>,
    object: RemoteObject,
}

impl JsHandle {
    pub fn new(context: Arc<ExecutionContext>, object: RemoteObject) -> Self {
        Self { context, object }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    pub fn object_id(&self) -> Option<&RemoteObjectId> {
        self.object.object_id.as_ref()
    }

    /// The local value of this handle, if the object had one
    pub fn json_value(&self) -> Value {
        parse_remote_object(&self.object)
    }

    /// Whether the remote object is a DOM node
    pub fn is_element(&self) -> bool {
        self.object.subtype.as_deref() == Some("node")
    }

    /// Release the remote object. The browser side may already be gone,
    /// so no reply is awaited.
    pub async fn dispose(&self) {
        if let Some(object_id) = &self.object.object_id {
            self.context
                .session()
                .execute_fire_and_forget(
                    "Runtime.releaseObject",
                    &ReleaseObject {
                        object_id: object_id.clone(),
                    },
                )
                .await;
        }
    }
}

impl std::fmt::Debug for JsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsHandle")
            .field("context", &self.context.id())
            .field("object_id", &self.object.object_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_object_value_precedence() {
        let obj = RemoteObject {
            value: Some(serde_json::json!(42)),
            description: Some("ignored".into()),
            ..Default::default()
        };
        assert_eq!(parse_remote_object(&obj), serde_json::json!(42));

        let obj = RemoteObject {
            unserializable_value: Some("NaN".into()),
            description: Some("NaN".into()),
            ..Default::default()
        };
        assert_eq!(parse_remote_object(&obj), serde_json::json!("NaN"));

        let obj = RemoteObject::default();
        assert_eq!(parse_remote_object(&obj), Value::Null);
    }
}
