use std::sync::Arc;

use anyhow::Result;

use crate::api::{FeedKind, ToggleAction, ToggleMethod, ToggleOutcome};
use crate::data::InteractionService;
use crate::render;

/// Identity and intent recovered from a clicked toggle element. The UI layer
/// reads the element's attributes once and passes the values here; nothing
/// downstream touches the DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleTarget {
    pub item_id: i64,
    pub item_kind: FeedKind,
    pub action: ToggleAction,
    pub method: ToggleMethod,
}

impl ToggleTarget {
    /// Recovers a target from attribute lookups. Returns `None` when any
    /// attribute is missing or unrecognized, such as a click on the share
    /// icon, so the caller silently ignores the event.
    pub fn from_attrs<'a, F>(get: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let item_id = get("item-id")?.parse().ok()?;
        let item_kind = get("item-kind")?.parse().ok()?;
        let action = ToggleAction::from_tag(get("data-action")?)?;
        let method = ToggleMethod::from_attr(get("method")?)?;
        Some(Self {
            item_id,
            item_kind,
            action,
            method,
        })
    }
}

/// The authoritative display state after a toggle: the server reports the
/// method the NEXT request should use, and the new count. Applying the same
/// update twice leaves the element unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleUpdate {
    pub method: ToggleMethod,
    pub count: i64,
}

impl ToggleUpdate {
    /// An element whose next request is DELETE is currently active.
    pub fn is_active(&self) -> bool {
        self.method == ToggleMethod::Delete
    }

    pub fn method_attr(&self) -> &'static str {
        self.method.as_str()
    }

    /// Icon class the element should show, for the action that produced
    /// this update.
    pub fn icon(&self, action: ToggleAction) -> &'static str {
        match action {
            ToggleAction::Likes => render::like_icon(self.is_active()),
            ToggleAction::Collects => render::collect_icon(self.is_active()),
        }
    }
}

impl From<ToggleOutcome> for ToggleUpdate {
    fn from(outcome: ToggleOutcome) -> Self {
        Self {
            method: outcome.method,
            count: outcome.count,
        }
    }
}

/// Executes like/collect toggles and projects the server's response into
/// display state. No optimistic prediction: state only changes when the
/// server answers.
pub struct Toggler {
    service: Arc<dyn InteractionService>,
}

impl Toggler {
    pub fn new(service: Arc<dyn InteractionService>) -> Self {
        Self { service }
    }

    pub fn toggle(&self, target: ToggleTarget) -> Result<ToggleUpdate> {
        let outcome = self.service.toggle(
            target.item_kind,
            target.item_id,
            target.action,
            target.method,
        )?;
        Ok(outcome.into())
    }

    /// Attribute-driven entry point for the UI layer. `Ok(None)` means the
    /// click was not a toggle and nothing happened.
    pub fn toggle_attrs<'a, F>(&self, get: F) -> Result<Option<ToggleUpdate>>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        match ToggleTarget::from_attrs(get) {
            Some(target) => self.toggle(target).map(Some),
            None => Ok(None),
        }
    }
}
