//! Inbound chat completion request model.
//!
//! [`ChatCompletionRequest`] mirrors vLLM's chat completion parameters: the
//! OpenAI fields, vLLM's sampling parameters and its chat-template / guided
//! decoding extensions. Every field carries its declared default, and any field
//! the gateway does not model is kept verbatim in an open map so new upstream
//! parameters pass through without a gateway release.
//!
//! The forwarded payload is deliberately minimal: [`ChatCompletionRequest::extra_parameters`]
//! only contains values that differ from their declared default, so the
//! upstream server's own defaults are never overridden by accident.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One chat message. Roles are not restricted; extra keys (`name`,
/// `tool_calls`, `tool_call_id`, …) are preserved.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    /// A string, an array of content parts, or `null`.
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated `/chat/completions` request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub params: SamplingParams,
}

/// Everything except `messages`, `model` and `stream`.
///
/// Serialising this struct yields exactly the extra parameters to forward:
/// each typed field is skipped while it equals its declared default, and the
/// unknown fields in [`SamplingParams::extra`] are flattened back in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingParams {
    // Ordered as in the OpenAI chat completions reference.
    #[serde(default = "defaults::zero", skip_serializing_if = "defaults::is_zero")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<BTreeMap<String, f64>>,
    #[serde(default = "defaults::off", skip_serializing_if = "defaults::is_off")]
    pub logprobs: Option<bool>,
    #[serde(default = "defaults::zero_count", skip_serializing_if = "defaults::is_zero_count")]
    pub top_logprobs: Option<i64>,
    /// Deprecated upstream in favour of `max_completion_tokens`; still forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i64>,
    #[serde(default = "defaults::one", skip_serializing_if = "defaults::is_one")]
    pub n: i64,
    #[serde(default = "defaults::zero", skip_serializing_if = "defaults::is_zero")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default = "defaults::no_stop", skip_serializing_if = "defaults::is_no_stop")]
    pub stop: Option<Stop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Ignored by vLLM (the model decides), forwarded for completeness.
    #[serde(default = "defaults::off", skip_serializing_if = "defaults::is_off")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    // vLLM sampling parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_of: Option<i64>,
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub use_beam_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(default = "defaults::one_f64", skip_serializing_if = "defaults::is_one_f64")]
    pub length_penalty: f64,
    #[serde(default = "defaults::no_ids", skip_serializing_if = "defaults::is_no_ids")]
    pub stop_token_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub include_stop_str_in_output: bool,
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub ignore_eos: bool,
    #[serde(default, skip_serializing_if = "defaults::is_zero_int")]
    pub min_tokens: i64,
    #[serde(default = "defaults::yes", skip_serializing_if = "defaults::is_true")]
    pub skip_special_tokens: bool,
    #[serde(default = "defaults::yes", skip_serializing_if = "defaults::is_true")]
    pub spaces_between_special_tokens: bool,
    /// Must be at least 1 when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_prompt_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_logprobs: Option<i64>,

    // vLLM chat template and guided decoding parameters.
    /// Prepend the last message to the output when roles match.
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub echo: bool,
    #[serde(default = "defaults::yes", skip_serializing_if = "defaults::is_true")]
    pub add_generation_prompt: bool,
    /// Leave the final message open-ended so the model continues it.
    /// Mutually exclusive with `add_generation_prompt`.
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub continue_final_message: bool,
    #[serde(default, skip_serializing_if = "defaults::is_false")]
    pub add_special_tokens: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<BTreeMap<String, String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template_kwargs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mm_processor_kwargs: Option<Map<String, Value>>,
    /// A JSON schema, either inline or as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_choice: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_grammar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_decoding_backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_whitespace_pattern: Option<String>,
    /// Lower is scheduled earlier. Non-zero requires priority scheduling upstream.
    #[serde(default, skip_serializing_if = "defaults::is_zero_int")]
    pub priority: i64,
    /// Generated per request when the caller omits it, so it is always forwarded.
    #[serde(default = "defaults::request_id")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_tokens_as_token_ids: Option<bool>,

    /// Fields this gateway does not model, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `stop` accepts a single sequence or a list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatType {
    #[default]
    Text,
    JsonObject,
    JsonSchema,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: ResponseFormatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaResponseFormat>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonSchemaResponseFormat {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous_usage_stats: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The only tool type the chat API defines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    #[default]
    Function,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    #[serde(rename = "type", default)]
    pub kind: ToolType,
    pub function: FunctionDefinition,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `"none"`, `"auto"`, or `{"type": "function", "function": {"name": …}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    None,
    Auto,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamedToolChoice {
    pub function: NamedFunction,
    #[serde(rename = "type", default)]
    pub kind: ToolType,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamedFunction {
    pub name: String,
}

/// The projection of a request that is sent upstream.
///
/// Serialises to the flat OpenAI body: `{model, messages, stream, ...extra}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamCallParameters {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(flatten)]
    pub extra_parameters: Map<String, Value>,
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// The request body failed schema or constraint checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid request: {}", summary(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Wrap a decode failure of the whole body.
    pub fn malformed(err: &serde_json::Error) -> Self {
        Self::field("body", err.to_string())
    }
}

impl ChatCompletionRequest {
    /// Decode and validate a request body.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let request: Self =
            serde_json::from_value(value).map_err(|e| ValidationError::malformed(&e))?;
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        let mut reject = |field: &str, message: &str| {
            errors.push(FieldError {
                field: field.into(),
                message: message.into(),
            });
        };

        if self.messages.is_empty() {
            reject("messages", "must contain at least one message");
        }
        if self.params.truncate_prompt_tokens.is_some_and(|t| t < 1) {
            reject("truncate_prompt_tokens", "must be at least 1");
        }
        if self.params.continue_final_message && self.params.add_generation_prompt {
            reject(
                "continue_final_message",
                "cannot be combined with add_generation_prompt",
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Non-default parameters other than `messages`, `model` and `stream`,
    /// plus every unknown field.
    pub fn extra_parameters(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.params) {
            Ok(Value::Object(map)) => map,
            // SamplingParams has only string keys and finite numbers parsed
            // from JSON, so it always serialises to an object.
            _ => Map::new(),
        }
    }

    /// The request's own model, else the process-wide default.
    pub fn resolve_model(&self, default_model: Option<&str>) -> Result<String, ValidationError> {
        self.model
            .as_deref()
            .or(default_model)
            .filter(|m| !m.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                ValidationError::field("model", "no model given and no default model configured")
            })
    }

    /// Project this request into the upstream call.
    pub fn upstream_params(
        &self,
        default_model: Option<&str>,
    ) -> Result<UpstreamCallParameters, ValidationError> {
        Ok(UpstreamCallParameters {
            model: self.resolve_model(default_model)?,
            messages: self.messages.clone(),
            stream: self.stream,
            extra_parameters: self.extra_parameters(),
        })
    }
}

mod defaults {
    use super::Stop;

    pub fn zero() -> Option<f64> {
        Some(0.0)
    }

    pub fn is_zero(v: &Option<f64>) -> bool {
        *v == Some(0.0)
    }

    pub fn off() -> Option<bool> {
        Some(false)
    }

    pub fn is_off(v: &Option<bool>) -> bool {
        *v == Some(false)
    }

    pub fn zero_count() -> Option<i64> {
        Some(0)
    }

    pub fn is_zero_count(v: &Option<i64>) -> bool {
        *v == Some(0)
    }

    pub fn one() -> i64 {
        1
    }

    pub fn is_one(v: &i64) -> bool {
        *v == 1
    }

    pub fn is_zero_int(v: &i64) -> bool {
        *v == 0
    }

    pub fn one_f64() -> f64 {
        1.0
    }

    pub fn is_one_f64(v: &f64) -> bool {
        *v == 1.0
    }

    pub fn yes() -> bool {
        true
    }

    pub fn is_true(v: &bool) -> bool {
        *v
    }

    pub fn is_false(v: &bool) -> bool {
        !*v
    }

    pub fn no_stop() -> Option<Stop> {
        Some(Stop::Many(Vec::new()))
    }

    pub fn is_no_stop(v: &Option<Stop>) -> bool {
        matches!(v, Some(Stop::Many(list)) if list.is_empty())
    }

    pub fn no_ids() -> Option<Vec<i64>> {
        Some(Vec::new())
    }

    pub fn is_no_ids(v: &Option<Vec<i64>>) -> bool {
        matches!(v, Some(ids) if ids.is_empty())
    }

    pub fn request_id() -> String {
        super::Uuid::new_v4().simple().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hello() -> Value {
        json!({ "messages": [{ "role": "user", "content": "hi" }] })
    }

    fn with(mut base: Value, fields: Value) -> Value {
        let obj = base.as_object_mut().unwrap();
        for (k, v) in fields.as_object().unwrap() {
            obj.insert(k.clone(), v.clone());
        }
        base
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    #[test]
    fn minimal_request_decodes_with_defaults() {
        let req = ChatCompletionRequest::from_value(hello()).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
        assert_eq!(req.messages[0].content, json!("hi"));
        assert!(req.model.is_none());
        assert!(!req.stream);
        assert_eq!(req.params.n, 1);
        assert!(req.params.skip_special_tokens);
        assert!(req.params.add_generation_prompt);
        assert_eq!(req.params.request_id.len(), 32, "uuid hex expected");
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "custom_knob": { "a": 1 }, "another": "x" }),
        ))
        .unwrap();
        assert_eq!(req.params.extra["custom_knob"], json!({ "a": 1 }));
        assert_eq!(req.params.extra["another"], "x");
    }

    #[test]
    fn message_extra_keys_survive() {
        let req = ChatCompletionRequest::from_value(json!({
            "messages": [{ "role": "tool", "content": "42", "tool_call_id": "call_1" }]
        }))
        .unwrap();
        assert_eq!(req.messages[0].extra["tool_call_id"], "call_1");
        let round = serde_json::to_value(&req.messages[0]).unwrap();
        assert_eq!(round, json!({ "role": "tool", "content": "42", "tool_call_id": "call_1" }));
    }

    #[test]
    fn typed_nested_shapes_decode() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({
                "stop": "END",
                "tool_choice": "auto",
                "tools": [{ "type": "function", "function": { "name": "lookup", "parameters": { "type": "object" } } }],
                "response_format": { "type": "json_schema", "json_schema": { "name": "out", "schema": { "type": "object" } } }
            }),
        ))
        .unwrap();
        assert_eq!(req.params.stop, Some(Stop::One("END".into())));
        assert!(matches!(req.params.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::Auto))));
        assert_eq!(req.params.tools.as_ref().unwrap()[0].function.name, "lookup");
        let format = req.params.response_format.as_ref().unwrap();
        assert_eq!(format.kind, ResponseFormatType::JsonSchema);
        assert_eq!(
            format.json_schema.as_ref().unwrap().schema,
            Some(json!({ "type": "object" }))
        );
    }

    #[test]
    fn named_tool_choice_decodes() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "tool_choice": { "type": "function", "function": { "name": "lookup" } } }),
        ))
        .unwrap();
        match req.params.tool_choice {
            Some(ToolChoice::Named(named)) => assert_eq!(named.function.name, "lookup"),
            other => panic!("expected named tool choice, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn missing_messages_is_rejected() {
        let err = ChatCompletionRequest::from_value(json!({ "model": "m" })).unwrap_err();
        assert!(err.to_string().contains("messages"), "got: {err}");
    }

    #[test]
    fn empty_messages_is_rejected() {
        let err = ChatCompletionRequest::from_value(json!({ "messages": [] })).unwrap_err();
        assert_eq!(err.errors[0].field, "messages");
    }

    #[test]
    fn truncate_prompt_tokens_below_minimum_is_rejected() {
        let err = ChatCompletionRequest::from_value(with(hello(), json!({ "truncate_prompt_tokens": 0 })))
            .unwrap_err();
        assert_eq!(err.errors[0].field, "truncate_prompt_tokens");
    }

    #[test]
    fn wrongly_typed_field_is_rejected() {
        let err = ChatCompletionRequest::from_value(with(hello(), json!({ "top_logprobs": "many" })))
            .unwrap_err();
        assert_eq!(err.errors[0].field, "body");
    }

    #[test]
    fn out_of_range_integers_are_left_to_upstream() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "top_logprobs": -1, "max_tokens": 5_000_000_000_i64, "n": 0, "min_tokens": -3 }),
        ))
        .unwrap();
        let extra = req.extra_parameters();
        assert_eq!(extra["top_logprobs"], json!(-1));
        assert_eq!(extra["max_tokens"], json!(5_000_000_000_i64));
        assert_eq!(extra["n"], json!(0));
        assert_eq!(extra["min_tokens"], json!(-3));
    }

    #[test]
    fn negative_truncate_prompt_tokens_is_rejected() {
        let err = ChatCompletionRequest::from_value(with(hello(), json!({ "truncate_prompt_tokens": -4 })))
            .unwrap_err();
        assert_eq!(err.errors[0].field, "truncate_prompt_tokens");
    }

    #[test]
    fn unknown_tool_choice_mode_is_rejected() {
        assert!(
            ChatCompletionRequest::from_value(with(hello(), json!({ "tool_choice": "sometimes" })))
                .is_err()
        );
    }

    #[test]
    fn continue_final_message_conflicts_with_generation_prompt() {
        let err = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "continue_final_message": true }),
        ))
        .unwrap_err();
        assert_eq!(err.errors[0].field, "continue_final_message");

        ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "continue_final_message": true, "add_generation_prompt": false }),
        ))
        .expect("allowed once the generation prompt is disabled");
    }

    #[test]
    fn all_violations_are_reported_together() {
        let err = ChatCompletionRequest::from_value(json!({
            "messages": [], "truncate_prompt_tokens": 0
        }))
        .unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["messages", "truncate_prompt_tokens"]);
    }

    // -----------------------------------------------------------------------
    // Extra parameters
    // -----------------------------------------------------------------------

    #[test]
    fn defaults_are_not_forwarded() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "n": 1, "frequency_penalty": 0.0, "stop": [], "skip_special_tokens": true }),
        ))
        .unwrap();
        let extra = req.extra_parameters();
        let keys: Vec<&str> = extra.keys().map(String::as_str).collect();
        assert_eq!(keys, ["request_id"], "only the generated request id is expected");
    }

    #[test]
    fn non_defaults_and_unknown_fields_are_forwarded() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({
                "temperature": 0.2,
                "n": 2,
                "skip_special_tokens": false,
                "guided_choice": ["yes", "no"],
                "stop": "END",
                "vendor_flag": true,
                "request_id": "abc"
            }),
        ))
        .unwrap();
        let extra = req.extra_parameters();
        assert_eq!(extra["temperature"], json!(0.2));
        assert_eq!(extra["n"], json!(2));
        assert_eq!(extra["skip_special_tokens"], json!(false));
        assert_eq!(extra["guided_choice"], json!(["yes", "no"]));
        assert_eq!(extra["stop"], json!("END"));
        assert_eq!(extra["vendor_flag"], json!(true));
        assert_eq!(extra["request_id"], json!("abc"));
    }

    #[test]
    fn explicit_null_differs_from_non_null_default() {
        let req = ChatCompletionRequest::from_value(with(hello(), json!({ "frequency_penalty": null })))
            .unwrap();
        assert_eq!(req.extra_parameters()["frequency_penalty"], Value::Null);
    }

    #[test]
    fn extra_parameters_never_contain_core_fields() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "model": "m", "stream": true }),
        ))
        .unwrap();
        let extra = req.extra_parameters();
        assert!(!extra.contains_key("messages"));
        assert!(!extra.contains_key("model"));
        assert!(!extra.contains_key("stream"));
    }

    // -----------------------------------------------------------------------
    // Model resolution & upstream projection
    // -----------------------------------------------------------------------

    #[test]
    fn explicit_model_wins_over_default() {
        let req = ChatCompletionRequest::from_value(with(hello(), json!({ "model": "mine" }))).unwrap();
        assert_eq!(req.resolve_model(Some("fallback")).unwrap(), "mine");
    }

    #[test]
    fn default_model_fills_in_when_absent() {
        let req = ChatCompletionRequest::from_value(hello()).unwrap();
        assert_eq!(req.resolve_model(Some("fallback")).unwrap(), "fallback");
    }

    #[test]
    fn missing_model_without_default_fails_validation() {
        let req = ChatCompletionRequest::from_value(hello()).unwrap();
        let err = req.upstream_params(None).unwrap_err();
        assert_eq!(err.errors[0].field, "model");
    }

    #[test]
    fn upstream_params_serialise_to_flat_body() {
        let req = ChatCompletionRequest::from_value(with(
            hello(),
            json!({ "stream": true, "temperature": 0.5, "request_id": "r1" }),
        ))
        .unwrap();
        let body = serde_json::to_value(req.upstream_params(Some("m")).unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "m",
                "messages": [{ "role": "user", "content": "hi" }],
                "stream": true,
                "temperature": 0.5,
                "request_id": "r1"
            })
        );
    }
}
