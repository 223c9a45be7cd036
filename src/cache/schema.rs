// SPDX-License-Identifier: MPL-2.0

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 2;

/// Tables of schema version 1, which stored denormalized JSON blobs.
/// Cache contents are disposable, so upgrading drops them.
pub const LEGACY_TABLES: &[&str] = &["feed_items", "feed_state", "notifications", "posts", "profiles"];

/// SQL schema for the cache database.
///
/// Timestamps are INTEGER milliseconds since the epoch. Every reference is a
/// foreign key; the saver writes tables in dependency order and stubs any
/// referenced row it has not seen in full.
pub const SCHEMA: &str = r#"
-- profiles: DID-keyed, completeness 0 = stub, 1 = basic, 2 = full
CREATE TABLE IF NOT EXISTS profiles (
    did TEXT PRIMARY KEY,
    handle TEXT,
    display_name TEXT,
    description TEXT,
    avatar TEXT,
    banner TEXT,
    followers_count INTEGER,
    follows_count INTEGER,
    posts_count INTEGER,
    lists_count INTEGER,
    feedgens_count INTEGER,
    starter_packs_count INTEGER,
    is_labeler INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER,
    indexed_at INTEGER,
    completeness INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_handle ON profiles(handle);

-- profile_viewer_state: relationship to each local account
CREATE TABLE IF NOT EXISTS profile_viewer_state (
    did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    viewer_did TEXT NOT NULL,
    muted INTEGER NOT NULL DEFAULT 0,
    blocked_by INTEGER NOT NULL DEFAULT 0,
    blocking TEXT,
    following TEXT,
    followed_by TEXT,
    PRIMARY KEY (did, viewer_did)
);

-- posts: one row per record, raw record kept as JSON
CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    cid TEXT,
    author_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    text TEXT,
    record_json TEXT,
    -- deferred: a page may hold a reply before the post it replies to
    reply_root TEXT REFERENCES posts(uri) ON DELETE SET NULL DEFERRABLE INITIALLY DEFERRED,
    reply_parent TEXT REFERENCES posts(uri) ON DELETE SET NULL DEFERRABLE INITIALLY DEFERRED,
    reply_count INTEGER,
    repost_count INTEGER,
    like_count INTEGER,
    quote_count INTEGER,
    created_at INTEGER,
    indexed_at INTEGER,
    completeness INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_did, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_posts_fetched_at ON posts(fetched_at);

-- post_viewer_state: like/repost records of each local account
CREATE TABLE IF NOT EXISTS post_viewer_state (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    viewer_did TEXT NOT NULL,
    like_uri TEXT,
    repost_uri TEXT,
    thread_muted INTEGER NOT NULL DEFAULT 0,
    reply_disabled INTEGER NOT NULL DEFAULT 0,
    pinned INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (post_uri, viewer_did)
);

-- embeds, shared between posts through join tables
CREATE TABLE IF NOT EXISTS external_embeds (
    uri TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    thumb TEXT
);

CREATE TABLE IF NOT EXISTS image_embeds (
    fullsize TEXT PRIMARY KEY,
    thumb TEXT NOT NULL,
    alt TEXT NOT NULL,
    width INTEGER,
    height INTEGER
);

CREATE TABLE IF NOT EXISTS video_embeds (
    cid TEXT PRIMARY KEY,
    playlist TEXT NOT NULL,
    thumbnail TEXT,
    alt TEXT,
    width INTEGER,
    height INTEGER
);

CREATE TABLE IF NOT EXISTS post_external_embeds (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    external_uri TEXT NOT NULL REFERENCES external_embeds(uri) ON DELETE CASCADE,
    PRIMARY KEY (post_uri, external_uri)
);

CREATE TABLE IF NOT EXISTS post_image_embeds (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    image_fullsize TEXT NOT NULL REFERENCES image_embeds(fullsize) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (post_uri, image_fullsize)
);

CREATE TABLE IF NOT EXISTS post_video_embeds (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    video_cid TEXT NOT NULL REFERENCES video_embeds(cid) ON DELETE CASCADE,
    PRIMARY KEY (post_uri, video_cid)
);

-- record_uri is a post, feed generator or list
CREATE TABLE IF NOT EXISTS post_record_embeds (
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    record_uri TEXT NOT NULL,
    PRIMARY KEY (post_uri, record_uri)
);

-- thread_edges: direct reply adjacency, depth derived at read time
CREATE TABLE IF NOT EXISTS thread_edges (
    child_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    parent_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    PRIMARY KEY (child_uri, parent_uri)
);

CREATE INDEX IF NOT EXISTS idx_thread_edges_parent ON thread_edges(parent_uri);

-- labels: subject is a record uri or a DID
CREATE TABLE IF NOT EXISTS labels (
    uri TEXT NOT NULL,
    value TEXT NOT NULL,
    creator_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    cid TEXT,
    created_at INTEGER,
    PRIMARY KEY (uri, value)
);

CREATE TABLE IF NOT EXISTS label_definitions (
    creator_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    identifier TEXT NOT NULL,
    severity TEXT NOT NULL,
    blurs TEXT NOT NULL,
    default_setting TEXT,
    adult_only INTEGER NOT NULL DEFAULT 0,
    locales_json TEXT NOT NULL,
    PRIMARY KEY (creator_did, identifier)
);

CREATE TABLE IF NOT EXISTS feed_generators (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    creator_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    service_did TEXT NOT NULL,
    display_name TEXT NOT NULL,
    description TEXT,
    avatar TEXT,
    like_count INTEGER,
    indexed_at INTEGER,
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS lists (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    creator_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    name TEXT NOT NULL,
    purpose TEXT NOT NULL,
    description TEXT,
    avatar TEXT,
    item_count INTEGER,
    indexed_at INTEGER,
    fetched_at INTEGER NOT NULL
);

-- feed_state: paging session per (viewer, source)
CREATE TABLE IF NOT EXISTS feed_state (
    viewer_did TEXT NOT NULL,
    source TEXT NOT NULL,
    first_request_at INTEGER NOT NULL,
    cursor TEXT,
    has_more INTEGER NOT NULL DEFAULT 1,
    next_offset INTEGER NOT NULL DEFAULT 0,
    refreshed_at INTEGER NOT NULL,
    PRIMARY KEY (viewer_did, source)
);

-- feed_items: one appearance of a post in a source
CREATE TABLE IF NOT EXISTS feed_items (
    viewer_did TEXT NOT NULL,
    source TEXT NOT NULL,
    item_id TEXT NOT NULL,
    post_uri TEXT NOT NULL REFERENCES posts(uri) ON DELETE CASCADE,
    sort_key INTEGER NOT NULL,
    reposter_did TEXT REFERENCES profiles(did) ON DELETE CASCADE,
    repost_uri TEXT,
    reposted_at INTEGER,
    reply_root TEXT REFERENCES posts(uri) ON DELETE CASCADE,
    reply_parent TEXT REFERENCES posts(uri) ON DELETE CASCADE,
    grandparent_author TEXT REFERENCES profiles(did) ON DELETE SET NULL,
    pinned INTEGER NOT NULL DEFAULT 0,
    feed_context TEXT,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (viewer_did, source, item_id),
    FOREIGN KEY (viewer_did, source) REFERENCES feed_state(viewer_did, source) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_feed_items_sort ON feed_items(viewer_did, source, sort_key DESC);
CREATE INDEX IF NOT EXISTS idx_feed_items_post ON feed_items(post_uri);

CREATE TABLE IF NOT EXISTS notifications (
    viewer_did TEXT NOT NULL,
    uri TEXT NOT NULL,
    cid TEXT NOT NULL,
    author_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    reason TEXT NOT NULL,
    reason_subject TEXT,
    post_uri TEXT REFERENCES posts(uri) ON DELETE SET NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    indexed_at INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (viewer_did, uri)
);

CREATE INDEX IF NOT EXISTS idx_notifications_indexed ON notifications(viewer_did, indexed_at DESC);

-- conversations: the same remote conversation is cached per owner
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT NOT NULL,
    owner_did TEXT NOT NULL,
    rev TEXT NOT NULL DEFAULT '',
    muted INTEGER NOT NULL DEFAULT 0,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_message_id TEXT,
    last_activity_at INTEGER,
    completeness INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (id, owner_did)
);

CREATE INDEX IF NOT EXISTS idx_conversations_activity
    ON conversations(owner_did, last_activity_at DESC);

CREATE TABLE IF NOT EXISTS conversation_members (
    owner_did TEXT NOT NULL,
    convo_id TEXT NOT NULL,
    member_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    PRIMARY KEY (owner_did, convo_id, member_did),
    FOREIGN KEY (convo_id, owner_did) REFERENCES conversations(id, owner_did) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS messages (
    owner_did TEXT NOT NULL,
    id TEXT NOT NULL,
    convo_id TEXT NOT NULL,
    rev TEXT NOT NULL DEFAULT '',
    sender_did TEXT NOT NULL REFERENCES profiles(did) ON DELETE CASCADE,
    text TEXT,
    sent_at INTEGER NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL,
    PRIMARY KEY (owner_did, id),
    FOREIGN KEY (convo_id, owner_did) REFERENCES conversations(id, owner_did) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_convo ON messages(owner_did, convo_id, sent_at DESC);
"#;
