// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, placeholders};
use crate::ids::Did;
use crate::timeline::Label;
use rusqlite::{Connection, params_from_iter};
use std::collections::HashMap;

/// A label value a labeler service declares.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelDefinition {
    pub creator: Did,
    pub identifier: String,
    pub severity: String,
    pub blurs: String,
    pub default_setting: Option<String>,
    pub adult_only: bool,
    /// Raw `locales` array as sent by the labeler.
    pub locales: serde_json::Value,
}

/// Cache operations for moderation labels
pub struct LabelCache<'a> {
    db: &'a CacheDb,
}

impl<'a> LabelCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Labels currently applied to a post uri or account DID.
    pub fn for_subject(&self, subject: &str) -> Result<Vec<Label>, CacheError> {
        let conn = self.db.conn();
        let mut labels = load_labels(&conn, &[subject])?;
        Ok(labels.remove(subject).unwrap_or_default())
    }

    /// Label values declared by one labeler, ordered by identifier.
    pub fn definitions(&self, creator: &Did) -> Result<Vec<LabelDefinition>, CacheError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT creator_did, identifier, severity, blurs, default_setting, adult_only, locales_json
            FROM label_definitions
            WHERE creator_did = ?1
            ORDER BY identifier
            "#,
        )?;

        let rows = stmt
            .query_map([creator], |row| {
                Ok((
                    row.get::<_, Did>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(creator, identifier, severity, blurs, default_setting, adult_only, locales)| {
                    Ok(LabelDefinition {
                        creator,
                        identifier,
                        severity,
                        blurs,
                        default_setting,
                        adult_only,
                        locales: serde_json::from_str(&locales)?,
                    })
                },
            )
            .collect()
    }
}

/// Labels for many subjects at once, keyed by subject.
pub(crate) fn load_labels(
    conn: &Connection,
    subjects: &[&str],
) -> Result<HashMap<String, Vec<Label>>, CacheError> {
    let mut out: HashMap<String, Vec<Label>> = HashMap::new();
    if subjects.is_empty() {
        return Ok(out);
    }

    let query = format!(
        "SELECT uri, value, creator_did FROM labels WHERE uri IN ({}) ORDER BY uri, value",
        placeholders(subjects.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(subjects), |row| {
        Ok((
            row.get::<_, String>(0)?,
            Label {
                value: row.get(1)?,
                creator: row.get(2)?,
            },
        ))
    })?;

    for row in rows {
        let (subject, label) = row?;
        out.entry(subject).or_default().push(label);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiEntitySaver;
    use crate::entity::{LabelDefinitionEntity, LabelEntity, ProfileEntity};

    #[test]
    fn test_labels_and_definitions() {
        let db = CacheDb::open_in_memory().unwrap();
        let labeler = Did::new("did:plc:mod").unwrap();

        let mut saver = MultiEntitySaver::new();
        saver.add(ProfileEntity::stub(labeler.clone()));
        for value in ["spam", "nsfw"] {
            saver.add(LabelEntity {
                uri: "did:plc:a".into(),
                value: value.into(),
                creator: labeler.clone(),
                cid: None,
                created_at: None,
                negated: false,
            });
        }
        saver.add(LabelDefinitionEntity {
            creator: labeler.clone(),
            identifier: "spam".into(),
            severity: "alert".into(),
            blurs: "none".into(),
            default_setting: Some("warn".into()),
            adult_only: false,
            locales_json: r#"[{"lang":"en","name":"Spam"}]"#.into(),
        });
        saver.commit(&db).unwrap();

        let cache = LabelCache::new(&db);
        let labels = cache.for_subject("did:plc:a").unwrap();
        let values: Vec<_> = labels.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, ["nsfw", "spam"]);
        assert!(cache.for_subject("did:plc:b").unwrap().is_empty());

        let definitions = cache.definitions(&labeler).unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].locales[0]["name"], "Spam");
    }
}
