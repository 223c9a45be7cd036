// SPDX-License-Identifier: MPL-2.0

use crate::cache::posts::load_posts;
use crate::cache::{CacheDb, CacheError, placeholders};
use crate::ids::{AtUri, Did};
use crate::timeline::{PostDetails, ThreadReply, ThreadTree};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use std::collections::{HashMap, HashSet};

/// Rebuilds threads from cached reply edges.
pub struct ThreadCache<'a> {
    db: &'a CacheDb,
}

impl<'a> ThreadCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Thread around `focus`: every cached ancestor and replies down to
    /// `reply_depth` levels.
    ///
    /// Edges come from many responses and may disagree, so each post is
    /// placed once, at the first position it is reached. Cycles end there.
    pub fn get(
        &self,
        focus: &AtUri,
        viewer: &Did,
        reply_depth: usize,
        quote_depth: usize,
    ) -> Result<ThreadTree, CacheError> {
        let conn = self.db.conn();
        let mut seen: HashSet<AtUri> = HashSet::from([focus.clone()]);

        let mut ancestors = Vec::new();
        let mut current = focus.clone();
        while let Some(parent) = parent_of(&conn, &current)? {
            if !seen.insert(parent.clone()) {
                break;
            }
            ancestors.push(parent.clone());
            current = parent;
        }
        ancestors.reverse();

        let mut children: HashMap<AtUri, Vec<AtUri>> = HashMap::new();
        let mut level = vec![focus.clone()];
        for _ in 0..reply_depth {
            if level.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for (parent, child) in children_of(&conn, &level)? {
                if seen.insert(child.clone()) {
                    children.entry(parent).or_default().push(child.clone());
                    next.push(child);
                }
            }
            level = next;
        }

        let uris: Vec<AtUri> = seen.iter().cloned().collect();
        let mut posts = load_posts(&conn, &uris, viewer, quote_depth)?;
        let focus_post = posts.remove(focus).ok_or(CacheError::NotFound)?;

        Ok(ThreadTree {
            ancestors: ancestors.iter().filter_map(|uri| posts.remove(uri)).collect(),
            replies: build_replies(focus, 1, &children, &mut posts),
            focus: focus_post,
        })
    }
}

fn parent_of(conn: &Connection, child: &AtUri) -> Result<Option<AtUri>, CacheError> {
    let parent = conn
        .query_row(
            "SELECT parent_uri FROM thread_edges WHERE child_uri = ?1 ORDER BY parent_uri LIMIT 1",
            [child],
            |row| row.get(0),
        )
        .optional()?;
    Ok(parent)
}

fn children_of(conn: &Connection, parents: &[AtUri]) -> Result<Vec<(AtUri, AtUri)>, CacheError> {
    let query = format!(
        r#"
        SELECT e.parent_uri, e.child_uri
        FROM thread_edges e
        JOIN posts p ON p.uri = e.child_uri
        WHERE e.parent_uri IN ({})
        ORDER BY p.created_at, e.child_uri
        "#,
        placeholders(parents.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt
        .query_map(params_from_iter(parents), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn build_replies(
    parent: &AtUri,
    depth: usize,
    children: &HashMap<AtUri, Vec<AtUri>>,
    posts: &mut HashMap<AtUri, PostDetails>,
) -> Vec<ThreadReply> {
    let Some(kids) = children.get(parent) else {
        return Vec::new();
    };
    kids.iter()
        .filter_map(|child| {
            let post = posts.remove(child)?;
            Some(ThreadReply {
                post,
                depth,
                replies: build_replies(child, depth + 1, children, posts),
            })
        })
        .collect()
}
