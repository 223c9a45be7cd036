// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{EmbedView, EmbeddedRecord};
use crate::entity::{
    EmbedLink, Entities, ExternalEmbedEntity, ImageEmbedEntity, PostEmbedLink, VideoEmbedEntity,
};
use crate::extract::graph::{feed_generator, list};
use crate::extract::post::{embedded_post, stub_post, stub_post_by};
use crate::ids::{AtUri, Cid, Did};

/// Embed entities of `post` and the join rows linking them.
///
/// Never fails: an embed that cannot be normalized is left out and the post
/// keeps the rest.
pub(crate) fn embed_view(post: &AtUri, embed: &EmbedView, viewer: &Did, out: &mut Entities) {
    let link = |link: EmbedLink| PostEmbedLink {
        post: post.clone(),
        link,
    };

    match embed {
        EmbedView::Images(images) => {
            for (position, image) in images.images.iter().enumerate() {
                out.push(ImageEmbedEntity {
                    fullsize: image.fullsize.clone(),
                    thumb: image.thumb.clone(),
                    alt: image.alt.clone(),
                    width: image.aspect_ratio.map(|r| r.width),
                    height: image.aspect_ratio.map(|r| r.height),
                });
                out.push(link(EmbedLink::Image {
                    fullsize: image.fullsize.clone(),
                    position: position as u32,
                }));
            }
        }
        EmbedView::External(external) => {
            let external = &external.external;
            out.push(ExternalEmbedEntity {
                uri: external.uri.clone(),
                title: external.title.clone(),
                description: external.description.clone(),
                thumb: external.thumb.clone(),
            });
            out.push(link(EmbedLink::External(external.uri.clone())));
        }
        EmbedView::Video(video) => {
            let Ok(cid) = Cid::new(video.cid.as_str()) else {
                return;
            };
            out.push(VideoEmbedEntity {
                cid: cid.clone(),
                playlist: video.playlist.clone(),
                thumbnail: video.thumbnail.clone(),
                alt: video.alt.clone(),
                width: video.aspect_ratio.map(|r| r.width),
                height: video.aspect_ratio.map(|r| r.height),
            });
            out.push(link(EmbedLink::Video(cid)));
        }
        EmbedView::Record(record) => {
            if let Some(quoted) = embedded_record(&record.record, viewer, out) {
                out.push(link(EmbedLink::Record(quoted)));
            }
        }
        EmbedView::RecordWithMedia(with_media) => {
            if let Some(quoted) = embedded_record(&with_media.record.record, viewer, out) {
                out.push(link(EmbedLink::Record(quoted)));
            }
            embed_view(post, &with_media.media, viewer, out);
        }
        EmbedView::Unknown => {}
    }
}

/// Stage the quoted record and return its uri when there is something to
/// link to. Unavailable posts become stubs so the quote survives as a
/// placeholder.
fn embedded_record(record: &EmbeddedRecord, viewer: &Did, out: &mut Entities) -> Option<AtUri> {
    match record {
        EmbeddedRecord::Post(view) => match embedded_post(view, viewer) {
            Ok(entities) => {
                out.extend(entities);
                AtUri::new(view.uri.as_str()).ok()
            }
            Err(_) => stage_stub(stub_post(&view.uri), out),
        },
        EmbeddedRecord::NotFound(missing) => stage_stub(stub_post(&missing.uri), out),
        EmbeddedRecord::Blocked(blocked) => {
            stage_stub(stub_post_by(&blocked.uri, &blocked.author.did), out)
        }
        EmbeddedRecord::Generator(view) => {
            let entities = feed_generator(view, viewer).ok()?;
            out.extend(entities);
            AtUri::new(view.uri.as_str()).ok()
        }
        EmbeddedRecord::List(view) => {
            let entities = list(view, viewer).ok()?;
            out.extend(entities);
            AtUri::new(view.uri.as_str()).ok()
        }
        EmbeddedRecord::Detached(_) | EmbeddedRecord::Unknown => None,
    }
}

fn stage_stub(
    stub: Result<(AtUri, Entities), crate::extract::ExtractError>,
    out: &mut Entities,
) -> Option<AtUri> {
    let (uri, entities) = stub.ok()?;
    out.extend(entities);
    Some(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Completeness, Entity};
    use serde_json::json;

    fn viewer() -> Did {
        Did::new("did:plc:viewer").unwrap()
    }

    fn post() -> AtUri {
        AtUri::new("at://did:plc:alice/app.bsky.feed.post/3kaaaaaaaaaa2").unwrap()
    }

    fn links(out: &Entities) -> Vec<EmbedLink> {
        out.iter()
            .filter_map(|e| match e {
                Entity::PostEmbed(link) => Some(link.link.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_images_keep_their_position() {
        let embed: EmbedView = serde_json::from_value(json!({
            "$type": "app.bsky.embed.images#view",
            "images": [
                {"thumb": "t1", "fullsize": "f1", "alt": "one"},
                {"thumb": "t2", "fullsize": "f2", "alt": "two", "aspectRatio": {"width": 4, "height": 3}}
            ]
        }))
        .unwrap();
        let mut out = Entities::new();
        embed_view(&post(), &embed, &viewer(), &mut out);

        assert_eq!(
            links(&out),
            vec![
                EmbedLink::Image { fullsize: "f1".into(), position: 0 },
                EmbedLink::Image { fullsize: "f2".into(), position: 1 },
            ]
        );
    }

    #[test]
    fn test_quote_of_quote_is_walked_to_the_end() {
        let embed: EmbedView = serde_json::from_value(json!({
            "$type": "app.bsky.embed.record#view",
            "record": {
                "$type": "app.bsky.embed.record#viewRecord",
                "uri": "at://did:plc:bob/app.bsky.feed.post/3kbbbbbbbbbb2",
                "cid": "bafyb",
                "author": {"did": "did:plc:bob"},
                "value": {"text": "middle"},
                "embeds": [{
                    "$type": "app.bsky.embed.record#view",
                    "record": {
                        "$type": "app.bsky.embed.record#viewRecord",
                        "uri": "at://did:plc:carol/app.bsky.feed.post/3kcccccccccc2",
                        "cid": "bafyc",
                        "author": {"did": "did:plc:carol"},
                        "value": {"text": "innermost"},
                        "embeds": [{
                            "$type": "app.bsky.embed.record#view",
                            "record": {
                                "$type": "app.bsky.embed.record#viewNotFound",
                                "uri": "at://did:plc:dave/app.bsky.feed.post/3kdddddddddd2",
                                "notFound": true
                            }
                        }]
                    }
                }]
            }
        }))
        .unwrap();
        let mut out = Entities::new();
        embed_view(&post(), &embed, &viewer(), &mut out);

        let posts: Vec<(String, Completeness)> = out
            .posts()
            .map(|p| (p.uri.rkey().unwrap_or_default().to_string(), p.completeness))
            .collect();
        assert!(posts.contains(&("3kbbbbbbbbbb2".into(), Completeness::Basic)));
        assert!(posts.contains(&("3kcccccccccc2".into(), Completeness::Basic)));
        assert!(posts.contains(&("3kdddddddddd2".into(), Completeness::Stub)));
        assert_eq!(links(&out).len(), 3);
    }

    #[test]
    fn test_detached_and_unknown_quotes_are_ignored() {
        for record in [
            json!({"$type": "app.bsky.embed.record#viewDetached", "uri": "at://did:plc:b/app.bsky.feed.post/x", "detached": true}),
            json!({"$type": "app.bsky.graph.defs#starterPackViewBasic", "uri": "at://did:plc:b/app.bsky.graph.starterpack/x"}),
        ] {
            let embed: EmbedView = serde_json::from_value(json!({
                "$type": "app.bsky.embed.record#view",
                "record": record
            }))
            .unwrap();
            let mut out = Entities::new();
            embed_view(&post(), &embed, &viewer(), &mut out);
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_blocked_quote_stubs_with_known_author() {
        let embed: EmbedView = serde_json::from_value(json!({
            "$type": "app.bsky.embed.recordWithMedia#view",
            "record": {"record": {
                "$type": "app.bsky.embed.record#viewBlocked",
                "uri": "at://did:plc:bob/app.bsky.feed.post/3kbbbbbbbbbb2",
                "blocked": true,
                "author": {"did": "did:plc:bob"}
            }},
            "media": {
                "$type": "app.bsky.embed.external#view",
                "external": {"uri": "https://example.com", "title": "t", "description": "d"}
            }
        }))
        .unwrap();
        let mut out = Entities::new();
        embed_view(&post(), &embed, &viewer(), &mut out);

        let stub = out.posts().next().unwrap();
        assert_eq!(stub.completeness, Completeness::Stub);
        assert_eq!(stub.author.as_str(), "did:plc:bob");
        assert_eq!(links(&out).len(), 2);
    }
}
