use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::api::{FeedItem, FeedKind};
use crate::config::FeedConfig;
use crate::data::FeedService;
use crate::render;
use crate::storage::Store;

/// Per-kind pagination state. `Exhausted` is terminal until the feed is
/// reinitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedState {
    Idle,
    Loading,
    Exhausted,
}

/// Handle returned when a feed takes ownership of a scroll surface. The
/// engine only honors events carrying the current generation, so listeners
/// left over from an abandoned kind (or a hidden modal) are dropped instead
/// of acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedBinding {
    kind: FeedKind,
    generation: u64,
}

impl FeedBinding {
    pub fn kind(&self) -> FeedKind {
        self.kind
    }
}

/// Geometry of the scrollable surface at the moment of the event: the window
/// for posts/tweets, the modal's inner pane for comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollMetrics {
    pub offset: f64,
    pub viewport: f64,
    pub content_height: f64,
    pub child_count: usize,
}

#[derive(Debug, Clone)]
pub struct Card {
    pub id: i64,
    pub kind: FeedKind,
    pub markup: String,
}

/// Newly rendered cards, in server order, for the UI to append and wire up.
/// Existing nodes are never included, so handlers are bound exactly once.
#[derive(Debug, Clone)]
pub struct PageRender {
    pub cards: Vec<Card>,
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub throttle: Duration,
    pub near_bottom_px: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(300),
            near_bottom_px: 200.0,
        }
    }
}

impl From<&FeedConfig> for Settings {
    fn from(cfg: &FeedConfig) -> Self {
        Self {
            throttle: cfg.throttle,
            near_bottom_px: cfg.near_bottom_px,
        }
    }
}

#[derive(Debug)]
struct Slot {
    kind: FeedKind,
    state: FeedState,
    generation: u64,
    last_event: Option<Instant>,
}

/// Drives lazy page loading for the window feed (posts or tweets, mutually
/// exclusive) and an independent comment sub-feed scoped to a modal pane.
pub struct FeedEngine {
    service: Arc<dyn FeedService>,
    store: Arc<Store>,
    settings: Settings,
    primary: Option<Slot>,
    overlay: Option<Slot>,
    generations: u64,
}

impl FeedEngine {
    pub fn new(service: Arc<dyn FeedService>, store: Arc<Store>, settings: Settings) -> Self {
        Self {
            service,
            store,
            settings,
            primary: None,
            overlay: None,
            generations: 0,
        }
    }

    /// Resets the window feed to `kind`: fetches the first page from the
    /// kind's fixed endpoint, stores its cursor, and hands back a fresh
    /// binding. The previous kind's binding is invalidated first, so two
    /// kinds never own the scroll surface at once. The caller clears the
    /// container before appending the returned cards.
    pub fn initialize(&mut self, kind: FeedKind) -> Result<(FeedBinding, PageRender)> {
        if kind == FeedKind::Comments {
            bail!("comment feeds are opened from a parent item");
        }
        self.primary = None;

        let page = self.service.first_page(kind)?;
        self.store.set_cursor(kind, page.next.as_deref())?;

        self.generations += 1;
        let generation = self.generations;
        let exhausted = page.next.is_none();
        self.primary = Some(Slot {
            kind,
            state: if exhausted {
                FeedState::Exhausted
            } else {
                FeedState::Idle
            },
            generation,
            last_event: None,
        });

        Ok((
            FeedBinding { kind, generation },
            render_page(kind, &page.items, exhausted),
        ))
    }

    /// Opens the comment sub-feed for one item. Independent of the window
    /// feed: the primary binding stays valid while the modal is up.
    pub fn open_comments(
        &mut self,
        parent_kind: FeedKind,
        parent_id: i64,
    ) -> Result<(FeedBinding, PageRender)> {
        self.overlay = None;

        let page = self.service.comment_page(parent_kind, parent_id)?;
        self.store
            .set_cursor(FeedKind::Comments, page.next.as_deref())?;

        self.generations += 1;
        let generation = self.generations;
        let exhausted = page.next.is_none();
        self.overlay = Some(Slot {
            kind: FeedKind::Comments,
            state: if exhausted {
                FeedState::Exhausted
            } else {
                FeedState::Idle
            },
            generation,
            last_event: None,
        });

        Ok((
            FeedBinding {
                kind: FeedKind::Comments,
                generation,
            },
            render_page(FeedKind::Comments, &page.items, exhausted),
        ))
    }

    /// Detaches the comment sub-feed when the modal hides; events carrying
    /// its binding are dropped from then on. Re-showing the modal reopens
    /// the sub-feed.
    pub fn close_comments(&mut self) {
        self.overlay = None;
    }

    /// Scroll-event entry point. Returns `Ok(None)` when nothing should
    /// happen: stale binding, throttled, not near the bottom, already
    /// loading, or exhausted. On a fetch failure the cursor is left
    /// untouched so the same page is retried on a later event.
    pub fn handle_scroll(
        &mut self,
        binding: FeedBinding,
        metrics: ScrollMetrics,
        now: Instant,
    ) -> Result<Option<PageRender>> {
        let service = self.service.clone();
        let store = self.store.clone();
        let throttle = self.settings.throttle;
        let near_bottom_px = self.settings.near_bottom_px;

        let slot = match self.slot_mut(binding) {
            Some(slot) => slot,
            None => return Ok(None),
        };

        // Leading-edge throttle: at most one evaluation per window.
        if let Some(last) = slot.last_event {
            if now.duration_since(last) < throttle {
                return Ok(None);
            }
        }
        slot.last_event = Some(now);

        match slot.state {
            FeedState::Exhausted | FeedState::Loading => return Ok(None),
            FeedState::Idle => {}
        }

        if !near_bottom(&metrics, near_bottom_px) {
            return Ok(None);
        }

        let next = match store.cursor(slot.kind)? {
            Some(Some(url)) => url,
            Some(None) => {
                slot.state = FeedState::Exhausted;
                return Ok(None);
            }
            None => return Ok(None),
        };

        slot.state = FeedState::Loading;
        let page = match service.page_at(&next) {
            Ok(page) => page,
            Err(err) => {
                slot.state = FeedState::Idle;
                return Err(err);
            }
        };
        if let Err(err) = store.set_cursor(slot.kind, page.next.as_deref()) {
            slot.state = FeedState::Idle;
            return Err(err);
        }

        let exhausted = page.next.is_none();
        slot.state = if exhausted {
            FeedState::Exhausted
        } else {
            FeedState::Idle
        };
        Ok(Some(render_page(slot.kind, &page.items, exhausted)))
    }

    fn slot_mut(&mut self, binding: FeedBinding) -> Option<&mut Slot> {
        let slot = if binding.kind == FeedKind::Comments {
            self.overlay.as_mut()
        } else {
            self.primary.as_mut()
        };
        slot.filter(|slot| slot.kind == binding.kind && slot.generation == binding.generation)
    }
}

fn near_bottom(metrics: &ScrollMetrics, near_bottom_px: f64) -> bool {
    // Threshold grows with the rendered item count, one unit per 20 items.
    let factor = metrics.child_count as f64 / 20.0;
    metrics.offset + metrics.viewport >= metrics.content_height - near_bottom_px * factor
}

fn render_page(kind: FeedKind, items: &[FeedItem], exhausted: bool) -> PageRender {
    // Server order is authoritative: append-only, no sort or dedup.
    let cards = items
        .iter()
        .map(|item| Card {
            id: item.id,
            kind,
            markup: render::card(kind, item),
        })
        .collect();
    PageRender { cards, exhausted }
}
