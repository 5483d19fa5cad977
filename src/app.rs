use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::api::{self, FeedKind};
use crate::config;
use crate::data::{
    ApiFeedService, ApiInteractionService, FeedService, InteractionService, MockFeedService,
    MockInteractionService,
};
use crate::feed::{FeedEngine, PageRender, ScrollMetrics, Settings};
use crate::session;
use crate::storage::{Options, Store};
use crate::toggle::{ToggleTarget, Toggler};

/// Interactive demo shell: paginates the feeds against a running server (or
/// built-in samples when no account is configured) and prints card markup.
pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load configuration")?;

    let store = Arc::new(
        Store::open(Options {
            path: cfg.storage.path.clone(),
        })
        .context("open state store")?,
    );
    let session = Arc::new(session::Manager::new(store.clone()).context("load session")?);

    let (feeds, interactions): (Arc<dyn FeedService>, Arc<dyn InteractionService>) =
        if cfg.account.email.is_empty() && session.token().is_none() {
            println!("No account configured; browsing built-in sample content.");
            (
                Arc::new(MockFeedService),
                Arc::new(MockInteractionService),
            )
        } else {
            let client = Arc::new(
                api::Client::new(
                    session.clone(),
                    api::ClientConfig {
                        base_url: cfg.api.base_url.clone(),
                        user_agent: cfg.api.user_agent.clone(),
                        timeout: Some(cfg.api.timeout),
                        http_client: None,
                    },
                )
                .context("build api client")?,
            );
            if !cfg.account.email.is_empty() {
                client
                    .login(&cfg.account.email, &cfg.account.password)
                    .context("sign in")?;
            }
            (
                Arc::new(ApiFeedService::new(client.clone())),
                Arc::new(ApiInteractionService::new(client)),
            )
        };

    let mut engine = FeedEngine::new(feeds, store, Settings::from(&cfg.feed));
    let toggler = Toggler::new(interactions);

    let (mut binding, first) = engine.initialize(FeedKind::Posts)?;
    print_page(&first);

    println!("enter: scroll, p: posts, t: tweets, c <id>: comments, l <id>: like, q: quit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        match input {
            "q" => break,
            "p" => {
                let (next_binding, page) = engine.initialize(FeedKind::Posts)?;
                binding = next_binding;
                print_page(&page);
            }
            "t" => {
                let (next_binding, page) = engine.initialize(FeedKind::Tweets)?;
                binding = next_binding;
                print_page(&page);
            }
            "" => {
                match engine.handle_scroll(binding, always_near(), Instant::now())? {
                    Some(page) => print_page(&page),
                    None => println!("(no more content)"),
                }
            }
            other => {
                if let Some(id) = parse_command(other, 'c') {
                    let (_, page) = engine.open_comments(binding.kind(), id)?;
                    print_page(&page);
                    engine.close_comments();
                } else if let Some(id) = parse_command(other, 'l') {
                    let update = toggler.toggle(ToggleTarget {
                        item_id: id,
                        item_kind: binding.kind(),
                        action: api::ToggleAction::Likes,
                        method: api::ToggleMethod::Post,
                    })?;
                    println!(
                        "likes: {} ({})",
                        update.count,
                        if update.is_active() { "liked" } else { "not liked" }
                    );
                } else {
                    println!("unrecognized input: {other}");
                }
            }
        }
        io::stdout().flush()?;
    }

    Ok(())
}

fn parse_command(input: &str, prefix: char) -> Option<i64> {
    let rest = input.strip_prefix(prefix)?;
    rest.trim().parse().ok()
}

// Stands in for real scroll geometry: every event lands near the bottom.
fn always_near() -> ScrollMetrics {
    ScrollMetrics {
        offset: 1.0,
        viewport: 1.0,
        content_height: 0.0,
        child_count: 0,
    }
}

fn print_page(page: &PageRender) {
    for card in &page.cards {
        println!("{}", card.markup);
    }
    if page.exhausted {
        println!("(end of feed)");
    }
}
