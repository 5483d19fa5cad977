use crate::api::{FeedItem, FeedKind};

/// Builds the card markup for one feed item. Posts and tweets render as
/// Semantic UI cards for the window feed; comments render as entries for the
/// modal's comment list.
pub fn card(kind: FeedKind, item: &FeedItem) -> String {
    match kind {
        FeedKind::Posts => post_card(item),
        FeedKind::Tweets => tweet_card(item),
        FeedKind::Comments => comment_card(item),
    }
}

/// Icon class for the like toggle, derived from the item's server-reported
/// state rather than predicted locally.
pub fn like_icon(is_liked: bool) -> &'static str {
    if is_liked {
        "red heart"
    } else {
        "heart outline"
    }
}

/// Icon class for the collect toggle.
pub fn collect_icon(is_collected: bool) -> &'static str {
    if is_collected {
        "yellow star"
    } else {
        "star outline"
    }
}

/// The method the next toggle request should use: an active item is
/// deactivated with DELETE, an inactive one activated with POST.
pub fn method_attr(is_active: bool) -> &'static str {
    if is_active {
        "delete"
    } else {
        "post"
    }
}

fn post_card(post: &FeedItem) -> String {
    format!(
        r#"
<div class="ui fluid card noBorderCard" item-id="{id}" item-kind="posts">
  <div class="content">
    <div class="right floated meta">{create_time}</div>
    <a class="header" href="{url}" target="_blank">{title}</a>
    <a class="meta" href="{author_bio}" target="_blank">
        {author}
    </a>
    <div class="description">
      <p>{body}</p>
    </div>
  </div>
  <div class="extra content">
    <span class="left floated iconItem" data-inverted data-tooltip="Likes" data-position="top left" data-variation="mini">
        <i class="{like_css} link icon" data-action="likes" method="{like_method}"></i>{like_count}
    </span>
    <span class="left floated iconItem" data-inverted data-tooltip="Comments" data-position="top left" data-variation="mini">
        <i class="comment link icon showComment"></i>{comment_count}
    </span>
    <span class="left floated iconItem" data-inverted data-tooltip="Favorites" data-position="top left" data-variation="mini">
        <i class="{star_css} link icon" data-action="collects" method="{star_method}"></i>{collect_count}
    </span>
    <span class="left floated" data-inverted data-tooltip="Share" data-position="top left" data-variation="mini">
        <i class="paper plane link icon"></i>
    </span>
  </div>
</div>
<div class="ui divider"></div>
"#,
        id = post.id,
        create_time = escape(&post.create_time),
        url = escape(&post.url),
        title = escape(&post.title),
        author_bio = escape(&post.author.bio),
        author = escape(&post.author.username),
        body = escape(&post.body),
        like_css = like_icon(post.is_liked),
        like_method = method_attr(post.is_liked),
        like_count = post.like_count,
        comment_count = post.comment_count,
        star_css = collect_icon(post.is_collected),
        star_method = method_attr(post.is_collected),
        collect_count = post.collect_count,
    )
}

fn tweet_card(tweet: &FeedItem) -> String {
    format!(
        r#"
<div class="ui fluid card noBorderCard" item-id="{id}" item-kind="tweets">
  <div class="content">
    <div class="right floated meta">{create_time}</div>
    <a class="header" href="{author_bio}" target="_blank">
        {author}
    </a>
    <div class="description">
      <p>{body}</p>
    </div>
  </div>
  <div class="extra content">
    <span class="left floated iconItem" data-inverted data-tooltip="Likes" data-position="top left" data-variation="mini">
        <i class="{like_css} link icon" data-action="likes" method="{like_method}"></i>{like_count}
    </span>
    <span class="left floated iconItem" data-inverted data-tooltip="Comments" data-position="top left" data-variation="mini">
        <i class="comment link icon showComment"></i>{comment_count}
    </span>
    <span class="left floated iconItem" data-inverted data-tooltip="Favorites" data-position="top left" data-variation="mini">
        <i class="{star_css} link icon" data-action="collects" method="{star_method}"></i>{collect_count}
    </span>
    <span class="left floated" data-inverted data-tooltip="Share" data-position="top left" data-variation="mini">
        <i class="paper plane link icon"></i>
    </span>
  </div>
</div>
<div class="ui divider"></div>
"#,
        id = tweet.id,
        create_time = escape(&tweet.create_time),
        author_bio = escape(&tweet.author.bio),
        author = escape(&tweet.author.username),
        body = escape(&tweet.body),
        like_css = like_icon(tweet.is_liked),
        like_method = method_attr(tweet.is_liked),
        like_count = tweet.like_count,
        comment_count = tweet.comment_count,
        star_css = collect_icon(tweet.is_collected),
        star_method = method_attr(tweet.is_collected),
        collect_count = tweet.collect_count,
    )
}

fn comment_card(comment: &FeedItem) -> String {
    // Replies carry an @mention of the parent comment's author.
    let mention = match &comment.parent {
        Some(parent) => format!(
            r#"<i class="at icon"></i><a class="author" href="{bio}" target="_blank">{username}</a>"#,
            bio = escape(&parent.author.bio),
            username = escape(&parent.author.username),
        ),
        None => String::new(),
    };
    format!(
        r#"
<div class="comment" item-id="{id}" item-kind="comments">
    <a class="avatar">
      <img src="{avatar}">
    </a>
    <div class="content">
      <a class="author" href="{author_bio}" target="_blank">
        {author}
      </a>
      {mention}
      <div class="metadata">
        <span class="date">{create_time}</span>
        <span data-inverted data-tooltip="Likes" data-position="right center" data-variation="mini">
            <i class="{like_css} link icon" data-action="likes" method="{like_method}"></i>{like_count}
        </span>
      </div>
      <div class="text">
        {body}
      </div>
      <div class="actions">
        <a class="reply">Reply</a>
      </div>
    </div>
</div>
"#,
        id = comment.id,
        avatar = escape(&comment.author.avatar),
        author_bio = escape(&comment.author.bio),
        author = escape(&comment.author.username),
        mention = mention,
        create_time = escape(&comment.create_time),
        like_css = like_icon(comment.is_liked),
        like_method = method_attr(comment.is_liked),
        like_count = comment.like_count,
        body = escape(&comment.body),
    )
}

/// Minimal HTML escaping for text and attribute positions.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
