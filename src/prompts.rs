//! System prompt assembly for the two generation paths. Only the
//! structure lives here: a knowledge-base section loaded from disk (with
//! a built-in fallback profile), the conversation context, and for the
//! HTML path a truncated snapshot of the current panel markup.

use std::fs;
use std::path::Path;

/// Built-in company profile used when no knowledge file is configured.
const DEFAULT_KNOWLEDGE: &str = "\
Mira — ассистент сервиса автоматизации рекрутинга. Помогает компаниям \
быстрее закрывать вакансии: автоматический скрининг откликов, \
AI-интервью и аналитика воронки найма.";

/// Markup snapshot passed to the HTML prompt is capped at this many
/// characters.
const CURRENT_HTML_LIMIT: usize = 500;

pub fn load_knowledge_base(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => content,
        _ => DEFAULT_KNOWLEDGE.to_string(),
    }
}

pub fn build_chat_system_prompt(knowledge: &str) -> String {
    format!(
        "Ты — Мира, дружелюбный ассистент по подбору персонала. Отвечай \
кратко, по-русски, помогай посетителю понять продукт и запишись на демо.\n\n\
База знаний:\n{}",
        knowledge
    )
}

pub fn build_html_system_prompt(
    knowledge: &str,
    conversation_context: &str,
    current_html: Option<&str>,
    last_user_message: &str,
) -> String {
    let current = current_html
        .map(|h| truncate_chars(h, CURRENT_HTML_LIMIT))
        .unwrap_or_default();
    format!(
        "Ты генерируешь HTML-фрагмент для информационной панели рядом с \
чатом. Только разметка без <html>/<body>, инлайн-стили без градиентов.\n\n\
База знаний:\n{knowledge}\n\n\
Диалог:\n{conversation_context}\n\n\
Текущая панель (начало):\n{current}\n\n\
Вопрос посетителя: {last_user_message}"
    )
}

/// First `limit` characters, never splitting a code point.
fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
