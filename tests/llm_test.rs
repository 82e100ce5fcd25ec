//! Tests for the dialect stream decoders and the tool-call loop.

mod common;

use common::*;
use openevo::llm::types::{ChatMessage, ChatOptions, LlmEvent, ToolCall, ToolOutcome};
use openevo::llm::{anthropic, chat_with_tools, collect_text, openai};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[test]
fn anthropic_decoder_accumulates_text_deltas() {
    let mut decoder = anthropic::StreamDecoder::new();

    let mut tokens = Vec::new();
    for chunk in ["你好", "！有什么", "可以帮你？"] {
        let events = decoder.feed(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": chunk }
        }));
        for event in events {
            if let LlmEvent::Token {
                content,
                full_response,
            } = event
            {
                tokens.push((content, full_response));
            }
        }
    }
    decoder.feed(&json!({ "type": "message_stop" }));
    assert!(decoder.finished());

    // Prefix-monotonic accumulation.
    assert_eq!(tokens.last().unwrap().1, "你好！有什么可以帮你？");
    for window in tokens.windows(2) {
        assert!(window[1].1.starts_with(&window[0].1));
    }

    let finals = decoder.finish();
    assert!(matches!(
        finals.last(),
        Some(LlmEvent::Done { full_response }) if full_response == "你好！有什么可以帮你？"
    ));
}

#[test]
fn anthropic_decoder_assembles_tool_use_from_json_deltas() {
    let mut decoder = anthropic::StreamDecoder::new();

    decoder.feed(&json!({
        "type": "content_block_start",
        "index": 0,
        "content_block": { "type": "tool_use", "id": "toolu_1", "name": "weather_lookup", "input": {} }
    }));
    decoder.feed(&json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": { "type": "input_json_delta", "partial_json": "{\"city\":" }
    }));
    decoder.feed(&json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": { "type": "input_json_delta", "partial_json": "\"北京\"}" }
    }));
    decoder.feed(&json!({ "type": "content_block_stop", "index": 0 }));
    decoder.feed(&json!({ "type": "message_stop" }));

    let finals = decoder.finish();
    match &finals[0] {
        LlmEvent::ToolCall { tool_calls, .. } => {
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].id, "toolu_1");
            assert_eq!(tool_calls[0].name, "weather_lookup");
            assert_eq!(tool_calls[0].arguments, json!({ "city": "北京" }));
        }
        other => panic!("expected ToolCall first, got {:?}", other),
    }
    assert!(matches!(finals[1], LlmEvent::Done { .. }));
}

#[test]
fn anthropic_decoder_surfaces_stream_errors() {
    let mut decoder = anthropic::StreamDecoder::new();
    let events = decoder.feed(&json!({
        "type": "error",
        "error": { "type": "overloaded_error", "message": "Overloaded" }
    }));
    assert!(matches!(
        events.first(),
        Some(LlmEvent::Error { error, .. }) if error == "Overloaded"
    ));
}

#[test]
fn openai_decoder_merges_tool_call_fragments() {
    let mut decoder = openai::StreamDecoder::new();

    decoder.feed(&json!({
        "id": "c1", "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": {
            "tool_calls": [{ "index": 0, "id": "call_1", "function": { "name": "weather_lookup", "arguments": "" } }]
        }, "finish_reason": null }]
    }));
    decoder.feed(&json!({
        "id": "c1", "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": {
            "tool_calls": [{ "index": 0, "function": { "arguments": "{\"city\":\"北" } }]
        }, "finish_reason": null }]
    }));
    decoder.feed(&json!({
        "id": "c1", "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": {
            "tool_calls": [{ "index": 0, "function": { "arguments": "京\"}" } }]
        }, "finish_reason": "tool_calls" }]
    }));

    let finals = decoder.finish();
    match &finals[0] {
        LlmEvent::ToolCall { tool_calls, .. } => {
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].id, "call_1");
            assert_eq!(tool_calls[0].arguments, json!({ "city": "北京" }));
        }
        other => panic!("expected ToolCall first, got {:?}", other),
    }
}

#[test]
fn openai_decoder_accumulates_content() {
    let mut decoder = openai::StreamDecoder::new();
    let mut full = String::new();
    for chunk in ["He", "llo"] {
        for event in decoder.feed(&json!({
            "id": "c1", "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": { "content": chunk }, "finish_reason": null }]
        })) {
            if let LlmEvent::Token { full_response, .. } = event {
                full = full_response;
            }
        }
    }
    assert_eq!(full, "Hello");
}

#[test]
fn anthropic_request_shapes_system_and_tools() {
    let messages = vec![
        ChatMessage::system("be helpful"),
        ChatMessage::user("hello"),
    ];
    let options = ChatOptions {
        tools: Some(vec![openevo::llm::types::ToolDefinition {
            name: "weather_lookup".to_string(),
            description: "look up weather".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }]),
        temperature: Some(0.2),
        ..Default::default()
    };

    let body = anthropic::build_request(&messages, &options, "claude-test", 1024);
    assert_eq!(body["system"], json!("be helpful"));
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["max_tokens"], json!(1024));
    assert_eq!(body["tools"][0]["name"], json!("weather_lookup"));
    assert!(body["tools"][0]["input_schema"].is_object());
    // System messages never appear in the messages array.
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[test]
fn openai_request_renders_tool_results_as_tool_role() {
    let messages = vec![
        ChatMessage::user("hello"),
        ChatMessage::assistant_blocks(vec![openevo::llm::types::ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "weather_lookup".to_string(),
            input: json!({ "city": "北京" }),
        }]),
        ChatMessage::tool_results(vec![openevo::llm::types::ContentBlock::ToolResult {
            tool_use_id: "call_1".to_string(),
            content: json!({ "temp": "-2°C" }),
            is_error: false,
        }]),
    ];

    let body = openai::build_request(&messages, &ChatOptions::default(), "gpt-test");
    let wire = body["messages"].as_array().unwrap();
    assert_eq!(wire.len(), 3);
    assert_eq!(wire[1]["tool_calls"][0]["id"], json!("call_1"));
    assert_eq!(
        wire[1]["tool_calls"][0]["function"]["name"],
        json!("weather_lookup")
    );
    assert_eq!(wire[2]["role"], json!("tool"));
    assert_eq!(wire[2]["tool_call_id"], json!("call_1"));
}

#[tokio::test]
async fn collect_text_returns_full_response() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("all done")]);
    let text = collect_text(
        provider.as_ref(),
        vec![ChatMessage::user("hi")],
        ChatOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(text, "all done");
}

#[tokio::test]
async fn tool_loop_executes_calls_then_finishes() {
    let provider = ScriptedProvider::new(vec![
        ScriptedReply::ToolCalls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "weather_lookup".to_string(),
            arguments: json!({ "city": "北京" }),
        }]),
        ScriptedProvider::text("北京今天晴，-2°C。"),
    ]);

    let executed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let executed_ref = executed.clone();

    let exec = move |call: ToolCall| {
        let executed = executed_ref.clone();
        async move {
            executed.lock().push(call.name.clone());
            ToolOutcome {
                tool_use_id: call.id,
                output: json!({ "temp": "-2°C" }),
                is_error: false,
            }
        }
    };

    let mut tokens = String::new();
    let response = chat_with_tools(
        provider.as_ref(),
        vec![ChatMessage::user("查一下北京天气")],
        ChatOptions::default(),
        exec,
        &CancellationToken::new(),
        |content| tokens.push_str(&content),
    )
    .await
    .unwrap();

    assert_eq!(response, "北京今天晴，-2°C。");
    assert_eq!(tokens, "北京今天晴，-2°C。");
    assert_eq!(*executed.lock(), vec!["weather_lookup".to_string()]);
    // Round 1 asked for the tool, round 2 summarized: two requests total,
    // the second carrying the assistant turn and the tool result.
    assert_eq!(provider.call_count(), 2);
    let second_request = provider.requests.lock()[1].clone();
    assert_eq!(second_request.len(), 3);
}

#[tokio::test]
async fn tool_loop_propagates_stream_errors() {
    let provider = ScriptedProvider::new(vec![ScriptedReply::Error("boom".to_string())]);

    let exec = |call: ToolCall| async move {
        ToolOutcome {
            tool_use_id: call.id,
            output: json!({}),
            is_error: false,
        }
    };

    let result = chat_with_tools(
        provider.as_ref(),
        vec![ChatMessage::user("hi")],
        ChatOptions::default(),
        exec,
        &CancellationToken::new(),
        |_| {},
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cancelled_token_stops_the_loop() {
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("never seen")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let exec = |call: ToolCall| async move {
        ToolOutcome {
            tool_use_id: call.id,
            output: json!({}),
            is_error: false,
        }
    };

    let result = chat_with_tools(
        provider.as_ref(),
        vec![ChatMessage::user("hi")],
        ChatOptions::default(),
        exec,
        &cancel,
        |_| {},
    )
    .await;
    assert!(matches!(result, Err(openevo::llm::LlmError::Cancelled)));
    assert_eq!(provider.call_count(), 0);
}
