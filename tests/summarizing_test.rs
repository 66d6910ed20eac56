//! Summarizing compactor integration tests

mod common;

use common::{ScriptedProvider, text_response};
use serde_json::json;
use std::sync::Arc;
use unichat::{
    ChatSession, Client, Compactor, DEFAULT_SUMMARY_MAX_TOKENS, Error, Message, SUMMARY_PREFIX,
    SummarizingCompactor, ToolRegistry, estimate_tokens, is_summary_message, tool,
};

fn history(turns: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are helpful.")];
    for i in 0..turns {
        messages.push(Message::user(format!("message number {}", i)));
    }
    messages
}

#[tokio::test]
async fn test_summary_replaces_older_turns() {
    let provider = ScriptedProvider::new(vec![Ok(text_response("They counted to six."))]);
    let compactor = SummarizingCompactor::new(Client::new(provider.clone()));

    let messages = history(10);
    assert!(estimate_tokens(&messages) > 70);
    let result = compactor.compact(&messages, 70).await.unwrap();

    assert_eq!(result.len(), 6);
    assert_eq!(result[0].text(), "You are helpful.");
    assert!(is_summary_message(&result[1]));
    assert!(result[1].text().starts_with(SUMMARY_PREFIX));
    assert!(result[1].text().contains("They counted to six."));
    let recent: Vec<String> = result[2..].iter().map(|m| m.text()).collect();
    assert_eq!(
        recent,
        vec![
            "message number 6",
            "message number 7",
            "message number 8",
            "message number 9"
        ]
    );

    // The transcript of the older turns went to the model
    assert_eq!(provider.call_count(), 1);
    let request = &provider.requests()[0];
    let prompt = request.last().unwrap().text();
    assert!(prompt.contains("message number 0"));
    assert!(prompt.contains("message number 5"));
    assert!(!prompt.contains("message number 6"));
}

#[tokio::test]
async fn test_summarizer_never_sends_tools() {
    let mut tools = ToolRegistry::new();
    tools.register(
        tool("noop", "Does nothing")
            .build(|_| async { Ok(json!(null)) })
            .unwrap(),
    );
    let provider = ScriptedProvider::new(vec![Ok(text_response("summary"))]);
    let client = Client::new(provider.clone()).with_tools(tools);
    let compactor = SummarizingCompactor::new(client);

    compactor.compact(&history(10), 70).await.unwrap();
    assert!(provider.request_options()[0].tools.is_empty());
}

#[tokio::test]
async fn test_summary_length_is_a_request_limit() {
    let provider = ScriptedProvider::always(text_response("short"));
    let default = SummarizingCompactor::new(Client::new(provider.clone()));
    default.compact(&history(10), 70).await.unwrap();

    let capped =
        SummarizingCompactor::new(Client::new(provider.clone())).with_summary_max_tokens(120);
    capped.compact(&history(10), 70).await.unwrap();

    let options = provider.request_options();
    assert_eq!(options[0].max_tokens, Some(DEFAULT_SUMMARY_MAX_TOKENS));
    assert_eq!(options[1].max_tokens, Some(120));
    assert!(
        provider.requests()[1]
            .last()
            .unwrap()
            .text()
            .contains("at most 120 tokens")
    );
}

#[tokio::test]
async fn test_short_or_small_history_is_unchanged() {
    let provider = ScriptedProvider::new(vec![]);
    let compactor = SummarizingCompactor::new(Client::new(provider.clone())).with_keep_recent(4);

    // Not more than keep_recent non-system messages
    let short = history(4);
    assert_eq!(compactor.compact(&short, 1).await.unwrap(), short);

    // Already within target
    let long = history(10);
    assert_eq!(compactor.compact(&long, 10_000).await.unwrap(), long);

    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_drops_recent_turns_until_fit_but_keeps_one() {
    let provider = ScriptedProvider::new(vec![Ok(text_response("Counting."))]);
    let compactor = SummarizingCompactor::new(Client::new(provider));

    let result = compactor.compact(&history(10), 10).await.unwrap();

    assert_eq!(result.len(), 3);
    assert!(result[0].is_system());
    assert!(is_summary_message(&result[1]));
    assert_eq!(result[2].text(), "message number 9");
}

#[tokio::test]
async fn test_summarization_failure_propagates() {
    let provider = ScriptedProvider::new(vec![Err(Error::Authentication("bad key".into()))]);
    let compactor = SummarizingCompactor::new(Client::new(provider));

    let err = compactor.compact(&history(10), 70).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn test_previous_summary_is_folded_in() {
    let provider = ScriptedProvider::new(vec![
        Ok(text_response("First summary.")),
        Ok(text_response("Second summary.")),
    ]);
    let compactor = SummarizingCompactor::new(Client::new(provider.clone()));

    let mut messages = compactor.compact(&history(10), 70).await.unwrap();
    for i in 10..16 {
        messages.push(Message::user(format!("message number {}", i)));
    }
    let result = compactor.compact(&messages, 70).await.unwrap();

    assert_eq!(result.iter().filter(|m| is_summary_message(m)).count(), 1);
    assert!(result[1].text().contains("Second summary."));
    let second_prompt = provider.requests()[1].last().unwrap().text();
    assert!(second_prompt.contains("First summary."));
}

#[tokio::test]
async fn test_session_with_summarizer() {
    let provider = ScriptedProvider::always(text_response("Earlier we chatted."));
    let compactor = SummarizingCompactor::new(Client::new(provider.clone())).with_keep_recent(2);
    let mut session = ChatSession::builder()
        .system_prompt("sys")
        .max_tokens(100)
        .compactor(Arc::new(compactor))
        .build()
        .unwrap();

    for i in 0..20 {
        session
            .add_message(Message::user(format!("turn {} {}", i, "z".repeat(40))))
            .await
            .unwrap();
    }

    let messages = session.messages();
    assert_eq!(messages[0].text(), "sys");
    assert!(messages.iter().any(is_summary_message));
    assert!(messages.last().unwrap().text().starts_with("turn 19"));
    assert!(provider.call_count() > 0);
}
