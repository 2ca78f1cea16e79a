//! Cumulative phase context.
//!
//! The provider is stateless between calls, so every call carries a
//! [`ContextBundle`] derived from the campaign's committed outputs. A stored
//! thread handle is reused while the provider reports it alive; otherwise a new
//! one is issued. Either way the bundle is rebuilt from the campaign, so its
//! rendered form does not depend on which path was taken.

use std::sync::Arc;

use db::ConversationThreadRepository;
use hookline_core::{Campaign, ConversationThread};
use provider::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Format version of the rendered bundle.
pub const BUNDLE_FORMAT: u32 = 1;

/// Free-text strings are cut to this many characters in the first
/// truncation pass.
const SHORTENED_TEXT_CHARS: usize = 400;

/// Free-text sections in the order they are dropped.
const DROP_ORDER: [&str; 4] = ["objections", "journey", "avatar", "product_info"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub name: String,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub format: u32,
    /// Number of committed phase outputs the bundle was built from.
    pub version: u32,
    pub sections: Vec<ContextSection>,
    pub truncated: bool,
}

impl ContextBundle {
    /// Build the bundle for `campaign`, truncated to `max_chars` rendered
    /// characters where possible.
    pub fn from_campaign(campaign: &Campaign, max_chars: usize) -> Self {
        let mut sections = Vec::new();
        let free_text = [
            ("product_info", &campaign.product_info),
            ("avatar", &campaign.avatar_analysis),
            ("journey", &campaign.journey_map),
            ("objections", &campaign.objections),
        ];
        for (name, value) in free_text {
            if let Some(content) = value {
                sections.push(ContextSection {
                    name: name.to_string(),
                    content: content.clone(),
                });
            }
        }

        if !campaign.angles.is_empty() {
            let angles: Vec<Value> = campaign
                .angles
                .iter()
                .map(|a| {
                    json!({
                        "id": a.id,
                        "type": a.angle_type.as_str(),
                        "number": a.number,
                        "category": a.category,
                        "concept": a.concept,
                    })
                })
                .collect();
            sections.push(ContextSection {
                name: "angles".to_string(),
                content: Value::Array(angles),
            });
        }

        let mut bundle = Self {
            format: BUNDLE_FORMAT,
            version: sections.len() as u32,
            sections,
            truncated: false,
        };
        bundle.fit(max_chars);
        bundle
    }

    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Render with an extra `target` section naming the item a batch
    /// sub-request is about.
    pub fn render_with_target(&self, target: Value) -> String {
        let mut bundle = self.clone();
        bundle.sections.push(ContextSection {
            name: "target".to_string(),
            content: target,
        });
        bundle.render()
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.content)
    }

    fn rendered_len(&self) -> usize {
        self.render().chars().count()
    }

    fn fit(&mut self, max_chars: usize) {
        if self.rendered_len() <= max_chars {
            return;
        }
        self.truncated = true;

        for section in self.sections.iter_mut().filter(|s| s.name != "angles") {
            shorten_strings(&mut section.content, SHORTENED_TEXT_CHARS);
        }

        for name in DROP_ORDER {
            if self.rendered_len() <= max_chars {
                return;
            }
            self.sections.retain(|s| s.name != name);
        }

        if self.rendered_len() > max_chars {
            if let Some(angles) = self
                .sections
                .iter_mut()
                .find(|s| s.name == "angles")
                .and_then(|s| s.content.as_array_mut())
            {
                for angle in angles.iter_mut().filter_map(Value::as_object_mut) {
                    angle.remove("concept");
                }
            }
        }
    }
}

fn shorten_strings(value: &mut Value, max_chars: usize) {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            let cut: String = s.chars().take(max_chars).collect();
            *s = format!("{}…", cut);
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| shorten_strings(v, max_chars)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|v| shorten_strings(v, max_chars)),
        _ => {}
    }
}

/// Thread handle plus the bundle to send with the next call.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub handle: String,
    pub bundle: ContextBundle,
}

#[derive(Clone)]
pub struct ContextManager {
    provider: Arc<dyn Provider>,
    threads: ConversationThreadRepository,
    max_context_chars: usize,
}

impl ContextManager {
    pub fn new(
        provider: Arc<dyn Provider>,
        threads: ConversationThreadRepository,
        max_context_chars: usize,
    ) -> Self {
        Self {
            provider,
            threads,
            max_context_chars,
        }
    }

    pub fn bundle(&self, campaign: &Campaign) -> ContextBundle {
        ContextBundle::from_campaign(campaign, self.max_context_chars)
    }

    pub async fn get_or_create_thread(&self, campaign: &Campaign) -> Result<ThreadContext> {
        let bundle = self.bundle(campaign);

        let stored = match campaign.conversation_thread_id.clone() {
            Some(handle) => Some(handle),
            None => self
                .threads
                .find_by_campaign(campaign.id)
                .await?
                .map(|t| t.handle),
        };

        if let Some(handle) = stored {
            match self.provider.thread_alive(&handle).await {
                Ok(true) => {
                    debug!(campaign_id = %campaign.id, thread_id = %handle, "Reusing conversation thread");
                    return Ok(ThreadContext { handle, bundle });
                }
                Ok(false) => {
                    info!(campaign_id = %campaign.id, thread_id = %handle, "Conversation thread expired, rebuilding context");
                }
                Err(e) => {
                    warn!(campaign_id = %campaign.id, "Thread liveness check failed, rebuilding context: {}", e);
                }
            }
        }

        let handle = self.provider.create_thread().await?;
        let thread = ConversationThread::new(campaign.id, handle.clone())
            .with_snapshot(serde_json::to_value(&bundle).unwrap_or(Value::Null), bundle.version);
        self.threads.upsert(&thread).await?;
        info!(campaign_id = %campaign.id, thread_id = %handle, "Created conversation thread");

        Ok(ThreadContext { handle, bundle })
    }

    /// Refresh the cached snapshot after a phase committed.
    pub async fn record_phase(&self, campaign: &Campaign, handle: &str) -> Result<()> {
        let bundle = self.bundle(campaign);
        let created_at = self
            .threads
            .find_by_campaign(campaign.id)
            .await?
            .filter(|t| t.handle == handle)
            .map(|t| t.created_at);

        let mut thread = ConversationThread::new(campaign.id, handle)
            .with_snapshot(serde_json::to_value(&bundle).unwrap_or(Value::Null), bundle.version);
        if let Some(created_at) = created_at {
            thread.created_at = created_at;
        }
        self.threads.upsert(&thread).await?;
        Ok(())
    }
}
