// src/rag/chat.rs
// Condense-then-answer chat layer over retrieval

use anyhow::Result;
use chrono::{Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::llm::{ChatMessage, ChatUsage, ModelPricing};

use super::engine::RagEngine;
use super::search::{ScoredNode, SearchFilters};

/// One prior exchange in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub user_text: String,
    pub assistant_text: String,
}

/// Result of one chat turn
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub answer: String,
    /// The standalone query actually used for retrieval
    pub condensed_query: String,
    pub nodes: Vec<ScoredNode>,
    pub retrieved_ids: Vec<String>,
    pub cost_usd: f64,
}

/// Rough per-turn character budget when trimming history for prompts
const HISTORY_CHAR_BUDGET: usize = 8_000;

fn hebrew_day_name(weekday: chrono::Weekday) -> &'static str {
    match weekday {
        chrono::Weekday::Mon => "יום שני",
        chrono::Weekday::Tue => "יום שלישי",
        chrono::Weekday::Wed => "יום רביעי",
        chrono::Weekday::Thu => "יום חמישי",
        chrono::Weekday::Fri => "יום שישי",
        chrono::Weekday::Sat => "שבת",
        chrono::Weekday::Sun => "יום ראשון",
    }
}

impl RagEngine {
    /// Run one conversational turn: condense the question against the
    /// history, retrieve with the session's filters, and synthesize an
    /// answer over the retrieved context.
    pub async fn chat_turn(
        &self,
        question: &str,
        history: &[HistoryTurn],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<ChatOutcome> {
        let mut usage_total = ChatUsage::default();

        let condensed = if history.is_empty() {
            question.to_string()
        } else {
            match self.condense_question(question, history).await {
                Ok((condensed, usage)) => {
                    usage_total.prompt_tokens += usage.prompt_tokens;
                    usage_total.completion_tokens += usage.completion_tokens;
                    condensed
                }
                Err(e) => {
                    debug!("Condense step failed, using raw question: {}", e);
                    question.to_string()
                }
            }
        };

        let nodes = self.retrieve(&condensed, k, filters).await?;
        let retrieved_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

        let context: String = nodes
            .iter()
            .map(|n| n.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let system_prompt = self.build_system_prompt();
        let context_prompt = format!(
            "Here are the relevant messages from the archive:\n\
             -----\n{}\n-----\n\
             IMPORTANT: Use BOTH the retrieved messages above AND the chat history \
             to answer the user's question. If the retrieved messages don't contain \
             new relevant information but you already discussed the topic in previous \
             turns, use that prior context to answer — do NOT say 'no results found' \
             when you already have the information from earlier in the conversation.\n\
             Only say no relevant messages were found if BOTH the retrieved context \
             AND the chat history lack the information needed to answer.",
            context
        );

        let mut messages = history_messages(history);
        messages.push(ChatMessage::user(format!("{}\n\n{}", context_prompt, question)));

        let llm = self.llm().await;
        let response = llm.chat(&system_prompt, messages).await?;
        usage_total.prompt_tokens += response.usage.prompt_tokens;
        usage_total.completion_tokens += response.usage.completion_tokens;

        let cost_usd = ModelPricing::chat_cost(
            llm.model(),
            usage_total.prompt_tokens,
            usage_total.completion_tokens,
        );

        info!(
            "Chat turn complete: {} nodes, {} prompt + {} completion tokens",
            nodes.len(),
            usage_total.prompt_tokens,
            usage_total.completion_tokens
        );

        Ok(ChatOutcome {
            answer: response.text,
            condensed_query: condensed,
            nodes,
            retrieved_ids,
            cost_usd,
        })
    }

    /// Condense a follow-up question plus history into a standalone query
    async fn condense_question(
        &self,
        question: &str,
        history: &[HistoryTurn],
    ) -> Result<(String, ChatUsage)> {
        let system = "Given the conversation history and a follow-up question, \
                      rephrase the follow-up into a single standalone search query \
                      that captures all context needed to find relevant messages. \
                      Keep the query in the same language as the question. \
                      Return ONLY the query text.";

        let mut messages = history_messages(history);
        messages.push(ChatMessage::user(format!("Follow-up question: {}", question)));

        let llm = self.llm().await;
        let response = llm.chat(system, messages).await?;
        let condensed = response.text.trim().to_string();
        debug!("Condensed query: {}", condensed);
        Ok((condensed, response.usage))
    }

    /// System prompt with the current date/time in the configured
    /// timezone, including Hebrew date strings so date questions work in
    /// both languages.
    pub fn build_system_prompt(&self) -> String {
        let now = Utc::now().with_timezone(self.timezone());
        let current_datetime = now.format("%A, %B %d, %Y at %H:%M").to_string();
        let hebrew_date = format!(
            "{}, {}/{}/{} בשעה {:02}:{:02}",
            hebrew_day_name(now.weekday()),
            now.day(),
            now.month(),
            now.year(),
            now.hour(),
            now.minute()
        );

        format!(
            "You are a helpful AI assistant for a personal knowledge base \
             and message archive search system.\n\
             You have access to retrieved messages and documents from multiple sources \
             (messaging platforms, documents, emails, etc.) that will be provided as context.\n\n\
             Current Date/Time: {current_datetime}\n\
             תאריך ושעה נוכחיים: {hebrew_date}\n\n\
             Instructions:\n\
             1. ANALYZE the retrieved messages to find information relevant to the question.\n\
             2. CITE specific messages when possible — mention who said what and when.\n\
             3. If multiple messages are relevant, SYNTHESIZE them into a coherent answer.\n\
             4. For follow-up questions, USE information from earlier in this conversation. \
             If you already provided an answer about a topic, build on it — do NOT say \
             \"no information found\" when you discussed it in a previous turn.\n\
             5. Only say you lack information when BOTH the retrieved context AND the \
             conversation history don't contain what's needed. Do NOT fabricate information.\n\
             6. If the question is general (like \"what day is today?\"), answer directly \
             without referencing the archive.\n\
             7. Answer in the SAME LANGUAGE as the question.\n\
             8. Be concise but thorough. Prefer specific facts over vague summaries."
        )
    }
}

fn history_messages(history: &[HistoryTurn]) -> Vec<ChatMessage> {
    // Bound by character budget, keeping the most recent turns
    let mut budget = HISTORY_CHAR_BUDGET;
    let mut kept: Vec<&HistoryTurn> = Vec::new();
    for turn in history.iter().rev() {
        let size = turn.user_text.len() + turn.assistant_text.len();
        if size > budget {
            break;
        }
        budget -= size;
        kept.push(turn);
    }
    kept.reverse();

    let mut messages = Vec::with_capacity(kept.len() * 2);
    for turn in kept {
        messages.push(ChatMessage::user(turn.user_text.clone()));
        messages.push(ChatMessage::assistant(turn.assistant_text.clone()));
    }
    messages
}

/// Source display filtering: limit the sources shown to the user by
/// minimum score and maximum count. Orthogonal to what the answerer saw.
pub fn filter_sources_for_display(
    nodes: &[ScoredNode],
    min_score: f32,
    max_count: usize,
) -> Vec<ScoredNode> {
    nodes
        .iter()
        .filter(|n| n.score >= min_score && !n.source_id.is_empty())
        .take(max_count)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, score: f32) -> ScoredNode {
        ScoredNode {
            id: id.to_string(),
            score,
            text: String::new(),
            source: "whatsapp".to_string(),
            source_id: format!("src:{}", id),
            chat_name: String::new(),
            sender: String::new(),
            timestamp: 0,
            content_type: "message".to_string(),
        }
    }

    #[test]
    fn display_filter_applies_min_score_and_cap() {
        let nodes = vec![node("a", 0.9), node("b", 0.4), node("c", 0.8), node("d", 0.85)];
        let shown = filter_sources_for_display(&nodes, 0.5, 2);
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].id, "a");
        assert_eq!(shown[1].id, "c");
    }

    #[test]
    fn history_respects_char_budget() {
        let turns: Vec<HistoryTurn> = (0..10)
            .map(|i| HistoryTurn {
                user_text: format!("question {} {}", i, "x".repeat(3000)),
                assistant_text: "y".repeat(3000),
            })
            .collect();
        let messages = history_messages(&turns);
        // Only the most recent turn fits the budget
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("question 9"));
    }
}
