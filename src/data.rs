use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::api::{
    self, Author, FeedItem, FeedKind, FeedPage, ProfileUpdate, ToggleAction, ToggleMethod,
    ToggleOutcome,
};

pub trait FeedService: Send + Sync {
    fn first_page(&self, kind: FeedKind) -> Result<FeedPage>;
    fn page_at(&self, url: &str) -> Result<FeedPage>;
    fn comment_page(&self, parent_kind: FeedKind, parent_id: i64) -> Result<FeedPage>;
}

pub trait InteractionService: Send + Sync {
    fn toggle(
        &self,
        kind: FeedKind,
        id: i64,
        action: ToggleAction,
        method: ToggleMethod,
    ) -> Result<ToggleOutcome>;
    fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<()>;
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn first_page(&self, kind: FeedKind) -> Result<FeedPage> {
        match kind {
            FeedKind::Posts => self.client.posts().context("fetch posts feed"),
            FeedKind::Tweets => self.client.tweets().context("fetch tweets feed"),
            FeedKind::Comments => bail!("comment feeds are scoped to a parent item"),
        }
    }

    fn page_at(&self, url: &str) -> Result<FeedPage> {
        self.client.page(url).context("fetch feed page")
    }

    fn comment_page(&self, parent_kind: FeedKind, parent_id: i64) -> Result<FeedPage> {
        self.client
            .comments(parent_kind, parent_id)
            .context("fetch comments")
    }
}

pub struct ApiInteractionService {
    client: Arc<api::Client>,
}

impl ApiInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ApiInteractionService {
    fn toggle(
        &self,
        kind: FeedKind,
        id: i64,
        action: ToggleAction,
        method: ToggleMethod,
    ) -> Result<ToggleOutcome> {
        self.client
            .toggle(kind, id, action, method)
            .context("toggle item action")
    }

    fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<()> {
        self.client
            .update_profile(user_id, update)
            .context("update profile")
    }
}

#[derive(Default)]
pub struct MockFeedService;

impl FeedService for MockFeedService {
    fn first_page(&self, kind: FeedKind) -> Result<FeedPage> {
        Ok(FeedPage {
            items: vec![sample_item(1, kind), sample_item(2, kind)],
            next: None,
        })
    }

    fn page_at(&self, _url: &str) -> Result<FeedPage> {
        Ok(FeedPage::default())
    }

    fn comment_page(&self, _parent_kind: FeedKind, _parent_id: i64) -> Result<FeedPage> {
        Ok(FeedPage {
            items: vec![sample_item(100, FeedKind::Comments)],
            next: None,
        })
    }
}

#[derive(Default)]
pub struct MockInteractionService;

impl InteractionService for MockInteractionService {
    fn toggle(
        &self,
        _kind: FeedKind,
        _id: i64,
        _action: ToggleAction,
        method: ToggleMethod,
    ) -> Result<ToggleOutcome> {
        // Echo what the real server does: report the next method.
        Ok(ToggleOutcome {
            method: match method {
                ToggleMethod::Post => ToggleMethod::Delete,
                ToggleMethod::Delete => ToggleMethod::Post,
            },
            count: 1,
        })
    }

    fn update_profile(&self, _user_id: i64, _update: &ProfileUpdate) -> Result<()> {
        Ok(())
    }
}

fn sample_item(id: i64, kind: FeedKind) -> FeedItem {
    FeedItem {
        id,
        title: format!("Sample {} {}", kind.as_str(), id),
        url: String::new(),
        body: "Offline sample content.".into(),
        create_time: String::new(),
        author: Author {
            username: "firefly".into(),
            bio: String::new(),
            avatar: String::new(),
        },
        like_count: 0,
        comment_count: 0,
        collect_count: 0,
        is_liked: false,
        is_collected: false,
        parent: None,
    }
}
