//! Review Guidelines
//!
//! Fetches the guideline document from Notion and renders it as GitHub markdown.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const NOTION_VERSION: &str = "2022-06-28";
/// Nesting levels fetched below the page
const MAX_DEPTH: usize = 8;

/// Source of the markdown posted on newly opened pull requests
#[async_trait]
pub trait GuidelineSource: Send + Sync {
    async fn fetch_markdown(&self) -> Result<String>;
}

/// Wrap rendered guidelines in the collapsible section posted on each PR
pub fn wrap_guidelines(markdown: &str) -> String {
    format!(
        "<details>\n<summary>Best Practices</summary>\n\n{}\n\n</details>",
        markdown.trim()
    )
}

/// Notion page rendered to markdown
pub struct NotionGuidelines {
    http: Client,
    api_url: String,
    page_id: String,
    token: String,
}

// ============================================================
// API Response Types
// ============================================================

#[derive(Debug, Deserialize)]
struct BlockList {
    results: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

/// A block with its fetched children
#[derive(Debug, Clone)]
struct BlockNode {
    block: serde_json::Value,
    children: Vec<BlockNode>,
}

#[derive(Debug, Deserialize)]
struct NotionError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct BlockContent {
    #[serde(default)]
    rich_text: Vec<RichText>,
    checked: Option<bool>,
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RichText {
    plain_text: String,
    href: Option<String>,
    #[serde(default)]
    annotations: Annotations,
}

#[derive(Debug, Default, Deserialize)]
struct Annotations {
    #[serde(default)]
    bold: bool,
    #[serde(default)]
    italic: bool,
    #[serde(default)]
    strikethrough: bool,
    #[serde(default)]
    code: bool,
}

impl NotionGuidelines {
    pub fn new(
        api_url: impl Into<String>,
        page_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            page_id: page_id.into(),
            token: token.into(),
        })
    }

    /// Blocks below `block_id`, descending into blocks that have children
    fn block_tree(&self, block_id: String, depth: usize) -> BoxFuture<'_, Result<Vec<BlockNode>>> {
        async move {
            let blocks = self.list_children(&block_id).await?;
            let mut nodes = Vec::with_capacity(blocks.len());

            for block in blocks {
                let children = match child_parent_id(&block) {
                    Some(id) if depth < MAX_DEPTH => self.block_tree(id, depth + 1).await?,
                    _ => Vec::new(),
                };
                nodes.push(BlockNode { block, children });
            }

            Ok(nodes)
        }
        .boxed()
    }

    /// Direct children of a block or page, following pagination
    async fn list_children(&self, block_id: &str) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/v1/blocks/{}/children", self.api_url, block_id);
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION)
                .query(&[("page_size", "100")]);
            if let Some(cursor) = &cursor {
                request = request.query(&[("start_cursor", cursor)]);
            }

            let response = request
                .send()
                .await
                .context("Failed to query Notion blocks")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<NotionError>(&body)
                    .map(|e| e.message)
                    .unwrap_or(body);
                bail!("Notion API error ({}): {}", status, message);
            }

            let page: BlockList = response
                .json()
                .await
                .context("Failed to parse Notion blocks response")?;
            blocks.extend(page.results);

            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        debug!(block_id, count = blocks.len(), "Fetched guideline blocks");
        Ok(blocks)
    }
}

/// ID to fetch children from, for blocks that report having any
fn child_parent_id(block: &serde_json::Value) -> Option<String> {
    if !block.get("has_children")?.as_bool()? {
        return None;
    }
    block.get("id")?.as_str().map(str::to_string)
}

#[async_trait]
impl GuidelineSource for NotionGuidelines {
    async fn fetch_markdown(&self) -> Result<String> {
        let blocks = self.block_tree(self.page_id.clone(), 0).await?;
        Ok(render_blocks(&blocks))
    }
}

// ============================================================
// Markdown Rendering
// ============================================================

/// Render blocks and their children. Unsupported block types are skipped.
fn render_blocks(nodes: &[BlockNode]) -> String {
    let mut out = String::new();
    let mut previous_was_list = false;
    let mut ordinal = 0;

    for node in nodes {
        let block = &node.block;
        let Some(kind) = block.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let content: BlockContent = block
            .get(kind)
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();
        let text = render_rich_text(&content.rich_text);

        ordinal = if kind == "numbered_list_item" { ordinal + 1 } else { 0 };

        let mut rendered = match kind {
            "paragraph" => text,
            "heading_1" => format!("# {}", text),
            "heading_2" => format!("## {}", text),
            "heading_3" => format!("### {}", text),
            "bulleted_list_item" => format!("- {}", text),
            "numbered_list_item" => format!("{}. {}", ordinal, text),
            "to_do" => {
                let mark = if content.checked.unwrap_or(false) { "x" } else { " " };
                format!("- [{}] {}", mark, text)
            }
            "quote" | "callout" => format!("> {}", text),
            "toggle" => {
                let body = render_blocks(&node.children);
                format!("<details>\n<summary>{}</summary>\n\n{}\n\n</details>", text, body)
            }
            "code" => {
                // Code blocks keep their raw text
                let raw: String = content.rich_text.iter().map(|t| t.plain_text.as_str()).collect();
                format!("```{}\n{}\n```", content.language.unwrap_or_default(), raw)
            }
            "divider" => "---".to_string(),
            other => {
                debug!(block_type = other, "Skipping unsupported Notion block");
                continue;
            }
        };

        let is_list = matches!(kind, "bulleted_list_item" | "numbered_list_item" | "to_do");

        let nested = match kind {
            "toggle" => String::new(),
            _ => render_blocks(&node.children),
        };
        if !nested.is_empty() {
            if is_list {
                // Nested list content lines up with the item text
                let width = rendered.find(' ').map_or(2, |i| i + 1);
                rendered = format!("{}\n{}", rendered, indent(&nested, width));
            } else {
                rendered = format!("{}\n\n{}", rendered, nested);
            }
        }

        if !out.is_empty() {
            out.push_str(if is_list && previous_was_list { "\n" } else { "\n\n" });
        }
        out.push_str(&rendered);
        previous_was_list = is_list;
    }

    out
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{}{}", pad, line) })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_rich_text(parts: &[RichText]) -> String {
    parts.iter().map(render_span).collect()
}

fn render_span(part: &RichText) -> String {
    let a = &part.annotations;
    let mut text = part.plain_text.clone();

    if text.trim().is_empty() {
        return text;
    }
    if a.code {
        text = format!("`{}`", text);
    }
    if a.bold {
        text = format!("**{}**", text);
    }
    if a.italic {
        text = format!("_{}_", text);
    }
    if a.strikethrough {
        text = format!("~~{}~~", text);
    }
    if let Some(href) = &part.href {
        text = format!("[{}]({})", text, href);
    }

    text
}
