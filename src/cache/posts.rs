// SPDX-License-Identifier: MPL-2.0

use crate::cache::graph::{load_generators, load_lists};
use crate::cache::labels::load_labels;
use crate::cache::profiles::load_summaries;
use crate::cache::saver::upsert_post_viewer_state;
use crate::cache::{CacheDb, CacheError, placeholders};
use crate::entity::{Completeness, PostViewerStateEntity};
use crate::ids::{AtUri, Cid, Did, Timestamp};
use crate::timeline::{
    EmbedDetails, ExternalDetails, ImageDetails, PostDetails, PostViewerState, QuotedRecord,
    VideoDetails,
};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params_from_iter};
use std::collections::{BTreeSet, HashMap};

/// Cache operations for posts
pub struct PostCache<'a> {
    db: &'a CacheDb,
}

impl<'a> PostCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Get post by URI, hydrating quotes `quote_depth` levels deep.
    pub fn get(&self, uri: &AtUri, viewer: &Did, quote_depth: usize) -> Result<PostDetails, CacheError> {
        let conn = self.db.conn();
        load_posts(&conn, std::slice::from_ref(uri), viewer, quote_depth)?
            .remove(uri)
            .ok_or(CacheError::NotFound)
    }

    /// Get multiple posts by URIs (preserves order, skips uncached)
    pub fn get_batch(
        &self,
        uris: &[AtUri],
        viewer: &Did,
        quote_depth: usize,
    ) -> Result<Vec<PostDetails>, CacheError> {
        let conn = self.db.conn();
        let mut posts = load_posts(&conn, uris, viewer, quote_depth)?;
        Ok(uris.iter().filter_map(|uri| posts.remove(uri)).collect())
    }

    /// Record a local like, repost or mute before the server confirms it.
    pub fn set_viewer_state(
        &self,
        post: &AtUri,
        viewer: &Did,
        state: &PostViewerState,
    ) -> Result<(), CacheError> {
        let entity = PostViewerStateEntity {
            post: post.clone(),
            viewer: viewer.clone(),
            like: state.like.clone(),
            repost: state.repost.clone(),
            thread_muted: state.thread_muted,
            reply_disabled: state.reply_disabled,
            pinned: state.pinned,
        };

        self.db.write(|tx| {
            let exists = tx
                .query_row("SELECT 1 FROM posts WHERE uri = ?1", [post], |_| Ok(()))
                .optional()?;
            if exists.is_none() {
                return Err(CacheError::NotFound);
            }
            upsert_post_viewer_state(tx, &entity)?;
            Ok(())
        })
    }
}

struct PostRow {
    uri: AtUri,
    cid: Option<Cid>,
    author: Did,
    text: Option<String>,
    record_json: Option<String>,
    reply_root: Option<AtUri>,
    reply_parent: Option<AtUri>,
    reply_count: Option<i64>,
    repost_count: Option<i64>,
    like_count: Option<i64>,
    quote_count: Option<i64>,
    created_at: Option<Timestamp>,
    indexed_at: Option<Timestamp>,
    completeness: Completeness,
}

impl PostRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uri: row.get(0)?,
            cid: row.get(1)?,
            author: row.get(2)?,
            text: row.get(3)?,
            record_json: row.get(4)?,
            reply_root: row.get(5)?,
            reply_parent: row.get(6)?,
            reply_count: row.get(7)?,
            repost_count: row.get(8)?,
            like_count: row.get(9)?,
            quote_count: row.get(10)?,
            created_at: row.get(11)?,
            indexed_at: row.get(12)?,
            completeness: row.get(13)?,
        })
    }
}

/// Hydrate every cached post in `uris`, keyed by uri.
///
/// Author, labels, viewer state and embeds are each fetched with one query
/// for the whole batch. Quoted posts recurse with one less level of depth.
pub(crate) fn load_posts(
    conn: &Connection,
    uris: &[AtUri],
    viewer: &Did,
    quote_depth: usize,
) -> Result<HashMap<AtUri, PostDetails>, CacheError> {
    let uris: Vec<AtUri> = uris.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    if uris.is_empty() {
        return Ok(HashMap::new());
    }

    let query = format!(
        r#"
        SELECT uri, cid, author_did, text, record_json, reply_root, reply_parent,
               reply_count, repost_count, like_count, quote_count,
               created_at, indexed_at, completeness
        FROM posts WHERE uri IN ({})
        "#,
        placeholders(uris.len())
    );
    let rows = conn
        .prepare(&query)?
        .query_map(params_from_iter(&uris), PostRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let authors: Vec<Did> = rows
        .iter()
        .map(|r| r.author.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let authors = load_summaries(conn, &authors)?;
    let subjects: Vec<&str> = uris.iter().map(AtUri::as_str).collect();
    let mut labels = load_labels(conn, &subjects)?;
    let mut viewer_states = load_viewer_states(conn, &uris, viewer)?;
    let mut embeds = load_embeds(conn, &uris, viewer, quote_depth)?;

    let mut posts = HashMap::with_capacity(rows.len());
    for row in rows {
        // Every post row references a profile row, so a miss means the
        // profile was deleted underneath us; skip rather than invent one.
        let Some(author) = authors.get(&row.author) else {
            continue;
        };
        posts.insert(
            row.uri.clone(),
            PostDetails {
                labels: labels.remove(row.uri.as_str()).unwrap_or_default(),
                viewer: viewer_states.remove(&row.uri),
                embeds: embeds.remove(&row.uri).unwrap_or_default(),
                author: author.clone(),
                uri: row.uri,
                cid: row.cid,
                text: row.text,
                record_json: row.record_json,
                reply_root: row.reply_root,
                reply_parent: row.reply_parent,
                reply_count: row.reply_count,
                repost_count: row.repost_count,
                like_count: row.like_count,
                quote_count: row.quote_count,
                created_at: row.created_at,
                indexed_at: row.indexed_at,
                completeness: row.completeness,
            },
        );
    }
    Ok(posts)
}

fn load_viewer_states(
    conn: &Connection,
    uris: &[AtUri],
    viewer: &Did,
) -> Result<HashMap<AtUri, PostViewerState>, CacheError> {
    let query = format!(
        r#"
        SELECT post_uri, like_uri, repost_uri, thread_muted, reply_disabled, pinned
        FROM post_viewer_state
        WHERE post_uri IN ({}) AND viewer_did = ?{}
        "#,
        placeholders(uris.len()),
        uris.len() + 1
    );
    let mut params: Vec<&dyn ToSql> = uris.iter().map(|u| u as &dyn ToSql).collect();
    params.push(viewer);

    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((
            row.get::<_, AtUri>(0)?,
            PostViewerState {
                like: row.get(1)?,
                repost: row.get(2)?,
                thread_muted: row.get(3)?,
                reply_disabled: row.get(4)?,
                pinned: row.get(5)?,
            },
        ))
    })?;
    Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
}

/// Run `sql` with its `{}` replaced by one placeholder per uri. Column 0
/// must be the post uri; the rest is handed to `map`.
fn query_grouped<T>(
    conn: &Connection,
    sql: &str,
    uris: &[AtUri],
    mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<HashMap<AtUri, Vec<T>>, CacheError> {
    let query = sql.replace("{}", &placeholders(uris.len()));
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(uris), |row| {
        Ok((row.get::<_, AtUri>(0)?, map(row)?))
    })?;

    let mut out: HashMap<AtUri, Vec<T>> = HashMap::new();
    for row in rows {
        let (uri, value) = row?;
        out.entry(uri).or_default().push(value);
    }
    Ok(out)
}

fn load_embeds(
    conn: &Connection,
    uris: &[AtUri],
    viewer: &Did,
    quote_depth: usize,
) -> Result<HashMap<AtUri, Vec<EmbedDetails>>, CacheError> {
    let images = query_grouped(
        conn,
        r#"
        SELECT pie.post_uri, ie.fullsize, ie.thumb, ie.alt, ie.width, ie.height
        FROM post_image_embeds pie
        JOIN image_embeds ie ON ie.fullsize = pie.image_fullsize
        WHERE pie.post_uri IN ({})
        ORDER BY pie.post_uri, pie.position
        "#,
        uris,
        |row| {
            Ok(ImageDetails {
                fullsize: row.get(1)?,
                thumb: row.get(2)?,
                alt: row.get(3)?,
                width: row.get(4)?,
                height: row.get(5)?,
            })
        },
    )?;

    let videos = query_grouped(
        conn,
        r#"
        SELECT pve.post_uri, ve.cid, ve.playlist, ve.thumbnail, ve.alt, ve.width, ve.height
        FROM post_video_embeds pve
        JOIN video_embeds ve ON ve.cid = pve.video_cid
        WHERE pve.post_uri IN ({})
        "#,
        uris,
        |row| {
            Ok(VideoDetails {
                cid: row.get(1)?,
                playlist: row.get(2)?,
                thumbnail: row.get(3)?,
                alt: row.get(4)?,
                width: row.get(5)?,
                height: row.get(6)?,
            })
        },
    )?;

    let externals = query_grouped(
        conn,
        r#"
        SELECT pee.post_uri, ee.uri, ee.title, ee.description, ee.thumb
        FROM post_external_embeds pee
        JOIN external_embeds ee ON ee.uri = pee.external_uri
        WHERE pee.post_uri IN ({})
        "#,
        uris,
        |row| {
            Ok(ExternalDetails {
                uri: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                thumb: row.get(4)?,
            })
        },
    )?;

    let records = query_grouped(
        conn,
        "SELECT post_uri, record_uri FROM post_record_embeds WHERE post_uri IN ({}) ORDER BY record_uri",
        uris,
        |row| row.get::<_, AtUri>(1),
    )?;
    let mut quoted = resolve_records(conn, &records, viewer, quote_depth)?;

    let mut out: HashMap<AtUri, Vec<EmbedDetails>> = HashMap::new();
    for (uri, images) in images {
        out.entry(uri).or_default().push(EmbedDetails::Images(images));
    }
    for (uri, videos) in videos {
        out.entry(uri)
            .or_default()
            .extend(videos.into_iter().map(EmbedDetails::Video));
    }
    for (uri, externals) in externals {
        out.entry(uri)
            .or_default()
            .extend(externals.into_iter().map(EmbedDetails::External));
    }
    for (uri, targets) in records {
        let entry = out.entry(uri).or_default();
        for target in targets {
            let record = quoted
                .remove(&target)
                .unwrap_or_else(|| QuotedRecord::Unavailable(target.clone()));
            entry.push(EmbedDetails::Record(record));
        }
    }
    Ok(out)
}

/// Resolve quoted records to a post, then a feed generator, then a list.
fn resolve_records(
    conn: &Connection,
    records: &HashMap<AtUri, Vec<AtUri>>,
    viewer: &Did,
    quote_depth: usize,
) -> Result<HashMap<AtUri, QuotedRecord>, CacheError> {
    let targets: Vec<AtUri> = records
        .values()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if targets.is_empty() {
        return Ok(HashMap::new());
    }
    if quote_depth == 0 {
        return Ok(targets
            .into_iter()
            .map(|uri| (uri.clone(), QuotedRecord::TooDeep(uri)))
            .collect());
    }

    let mut resolved = HashMap::new();
    for (uri, post) in load_posts(conn, &targets, viewer, quote_depth - 1)? {
        if post.is_hydrated() {
            resolved.insert(uri, QuotedRecord::Post(Box::new(post)));
        }
    }

    for (uri, generator) in load_generators(conn, &targets)? {
        resolved
            .entry(uri)
            .or_insert(QuotedRecord::Generator(generator));
    }
    for (uri, list) in load_lists(conn, &targets)? {
        resolved.entry(uri).or_insert(QuotedRecord::List(list));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiEntitySaver;
    use crate::entity::{
        EmbedLink, ImageEmbedEntity, PostEmbedLink, PostEntity, ProfileEntity,
    };

    fn did(s: &str) -> Did {
        Did::new(s).unwrap()
    }

    fn uri(rkey: &str) -> AtUri {
        AtUri::new(format!("at://did:plc:a/app.bsky.feed.post/{rkey}")).unwrap()
    }

    fn post(rkey: &str) -> PostEntity {
        PostEntity {
            text: Some(rkey.into()),
            completeness: Completeness::Full,
            ..PostEntity::stub(uri(rkey), did("did:plc:a"))
        }
    }

    fn quote(saver: &mut MultiEntitySaver, from: &str, to: &str) {
        saver.add(PostEmbedLink {
            post: uri(from),
            link: EmbedLink::Record(uri(to)),
        });
    }

    fn seeded() -> CacheDb {
        let db = CacheDb::open_in_memory().unwrap();
        let mut saver = MultiEntitySaver::new();
        saver.add(ProfileEntity {
            handle: Some("a.test".into()),
            completeness: Completeness::Basic,
            ..ProfileEntity::stub(did("did:plc:a"))
        });
        for rkey in ["p1", "p2", "p3"] {
            saver.add(post(rkey));
        }
        saver.add(PostEntity::stub(uri("gone"), did("did:plc:a")));
        quote(&mut saver, "p1", "p2");
        quote(&mut saver, "p2", "p3");
        quote(&mut saver, "p3", "gone");

        for (position, name) in [(1, "second"), (0, "first")] {
            let fullsize = format!("https://cdn.test/{name}");
            saver.add(ImageEmbedEntity {
                fullsize: fullsize.clone(),
                thumb: format!("{fullsize}/thumb"),
                alt: name.into(),
                width: None,
                height: None,
            });
            saver.add(PostEmbedLink {
                post: uri("p1"),
                link: EmbedLink::Image {
                    fullsize,
                    position,
                },
            });
        }
        saver.commit(&db).unwrap();
        db
    }

    #[test]
    fn test_quotes_hydrate_to_depth() {
        let db = seeded();
        let viewer = did("did:plc:v");
        let p1 = PostCache::new(&db).get(&uri("p1"), &viewer, 1).unwrap();

        let quoted = p1
            .embeds
            .iter()
            .find_map(|e| match e {
                EmbedDetails::Record(QuotedRecord::Post(p)) => Some(p),
                _ => None,
            })
            .unwrap();
        assert_eq!(quoted.uri, uri("p2"));
        assert_eq!(
            quoted.embeds,
            vec![EmbedDetails::Record(QuotedRecord::TooDeep(uri("p3")))]
        );
    }

    #[test]
    fn test_stub_quote_is_unavailable() {
        let db = seeded();
        let p3 = PostCache::new(&db).get(&uri("p3"), &did("did:plc:v"), 2).unwrap();
        assert_eq!(
            p3.embeds,
            vec![EmbedDetails::Record(QuotedRecord::Unavailable(uri("gone")))]
        );
    }

    #[test]
    fn test_images_keep_position_order() {
        let db = seeded();
        let p1 = PostCache::new(&db).get(&uri("p1"), &did("did:plc:v"), 0).unwrap();
        let EmbedDetails::Images(images) = &p1.embeds[0] else {
            panic!("expected images first, got {:?}", p1.embeds);
        };
        let alts: Vec<_> = images.iter().map(|i| i.alt.as_str()).collect();
        assert_eq!(alts, ["first", "second"]);
    }

    #[test]
    fn test_get_batch_preserves_order() {
        let db = seeded();
        let posts = PostCache::new(&db)
            .get_batch(&[uri("p3"), uri("missing"), uri("p1")], &did("did:plc:v"), 0)
            .unwrap();
        let uris: Vec<_> = posts.iter().map(|p| p.uri.clone()).collect();
        assert_eq!(uris, vec![uri("p3"), uri("p1")]);
    }

    #[test]
    fn test_set_viewer_state() {
        let db = seeded();
        let cache = PostCache::new(&db);
        let viewer = did("did:plc:v");
        let like = AtUri::new("at://did:plc:v/app.bsky.feed.like/1").unwrap();

        cache
            .set_viewer_state(
                &uri("p1"),
                &viewer,
                &PostViewerState {
                    like: Some(like.clone()),
                    ..PostViewerState::default()
                },
            )
            .unwrap();
        let p1 = cache.get(&uri("p1"), &viewer, 0).unwrap();
        assert_eq!(p1.viewer.unwrap().like, Some(like));

        let missing = cache.set_viewer_state(&uri("nope"), &viewer, &PostViewerState::default());
        assert!(matches!(missing, Err(CacheError::NotFound)));
    }
}
