//! Merging chunk results into one document-wide bullet list.
//!
//! Bullets are concatenated in chunk order, then in the order each chunk
//! produced them; nothing is re-sorted. Each merged bullet gains a
//! `global_id` of `"{chunk_index}:{id}"` so ids stay unique across chunks
//! and parent links never cross a chunk boundary.
//!
//! ## Deduplication
//!
//! Chunk boundaries can cut through a section, and the model then reports
//! the same submittal item from both sides. The key is
//! `(spec_section, article_number, submittal_title)`, lower-cased with
//! whitespace collapsed. A bullet is dropped when an *earlier chunk*
//! already produced its key; repeats inside one chunk are the model's own
//! doing and are kept. Bullets with an empty title have no identity and are
//! never dropped.
//!
//! Chunks do not overlap, so the children of a dropped repeat describe new
//! pages. They are kept and detached: `parent_id` is cleared, as it is for
//! any bullet whose parent is missing or not above it.
//!
//! The key ignores `submittal_type`, so an ACTION and a CLOSEOUT item with
//! the same title in the same article collapse into one.

use crate::output::{Bullet, ChunkResult, Gap, MergedBullet, MergedResult, RunStats};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Normalized identity of a submittal item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    spec_section: String,
    article_number: String,
    submittal_title: String,
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The dedup key of `bullet`, or `None` when it has no title.
pub fn dedup_key(bullet: &Bullet) -> Option<DedupKey> {
    let submittal_title = normalize(&bullet.submittal_title);
    if submittal_title.is_empty() {
        return None;
    }
    Some(DedupKey {
        spec_section: normalize(&bullet.spec_section),
        article_number: normalize(&bullet.article_number),
        submittal_title,
    })
}

/// `"{chunk_index}:{id}"`
pub fn global_id(chunk_index: usize, id: &str) -> String {
    format!("{}:{}", chunk_index, id)
}

/// Merge `results` into one [`MergedResult`].
///
/// Results are taken in chunk-index order whatever order they arrive in.
/// Failed results contribute a gap and no bullets. `duration_ms` is left at
/// zero for the caller to fill in.
pub fn merge(results: &[ChunkResult], total_pages: usize) -> MergedResult {
    let mut ordered: Vec<&ChunkResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.chunk_index);

    let mut stats = RunStats {
        total_pages,
        chunks_total: ordered.len(),
        ..Default::default()
    };
    let mut gaps = Vec::new();
    let mut bullets = Vec::new();
    let mut owner: HashMap<DedupKey, usize> = HashMap::new();

    for result in &ordered {
        stats.total_input_tokens += result.usage.input_tokens;
        stats.total_output_tokens += result.usage.output_tokens;
        stats.total_cost += result.usage.cost;
        stats.total_retries += result.attempts.saturating_sub(1);
        if result.repaired {
            stats.chunks_repaired += 1;
        }

        if let Some(err) = &result.error {
            stats.chunks_failed += 1;
            if err.kind() == "not_attempted" {
                stats.chunks_not_attempted += 1;
            }
            gaps.push(Gap {
                chunk_index: result.chunk_index,
                start_page: result.start_page,
                end_page: result.end_page,
                kind: err.kind().to_string(),
                reason: err.to_string(),
            });
            continue;
        }

        stats.bullets_before_dedup += result.bullets.len();
        let chunk = result.chunk_index;
        let mut dropped: HashSet<&str> = HashSet::new();
        let mut kept: HashMap<&str, u8> = HashMap::new();

        for original in &result.bullets {
            if let Some(key) = dedup_key(original) {
                let first = *owner.entry(key).or_insert(chunk);
                if first != chunk {
                    debug!(
                        "Dropping '{}' from chunk {} (already in chunk {})",
                        original.submittal_title, chunk, first
                    );
                    dropped.insert(original.id.as_str());
                    continue;
                }
            }

            let mut bullet = original.clone();
            let parent_ok = kept
                .get(bullet.parent_id.as_str())
                .is_some_and(|level| *level < bullet.level);
            let global_parent_id = if parent_ok {
                global_id(chunk, &bullet.parent_id)
            } else {
                if dropped.contains(bullet.parent_id.as_str()) {
                    debug!(
                        "Detaching '{}' in chunk {} from dropped parent '{}'",
                        bullet.id, chunk, bullet.parent_id
                    );
                }
                bullet.parent_id.clear();
                String::new()
            };
            kept.insert(original.id.as_str(), original.level);
            bullets.push(MergedBullet {
                global_id: global_id(chunk, &bullet.id),
                bullet,
                chunk_index: chunk,
                global_parent_id,
            });
        }
    }

    stats.total_tokens = stats.total_input_tokens + stats.total_output_tokens;
    stats.bullets_after_dedup = bullets.len();
    stats.duplicates_removed = stats.bullets_before_dedup - stats.bullets_after_dedup;

    MergedResult {
        partial: stats.chunks_failed > 0,
        ceiling_exceeded: stats.chunks_not_attempted > 0,
        bullets,
        stats,
        gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChunkError;
    use crate::output::TokenUsage;

    fn item(section: &str, article: &str, title: &str, id: &str) -> Bullet {
        Bullet::top_level(section, article, title, id)
    }

    fn chunk(index: usize, bullets: Vec<Bullet>) -> ChunkResult {
        let mut r = ChunkResult::empty(index, index * 10 - 9, index * 10);
        r.bullets = bullets;
        r.attempts = 1;
        r.usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 100,
            cost: 0.5,
        };
        r
    }

    #[test]
    fn key_normalizes_case_and_whitespace() {
        let a = item("12 24 13", "1.2", "Product  Data", "A");
        let b = item("12  24 13 ", "1.2", "product data", "B");
        assert_eq!(dedup_key(&a), dedup_key(&b));
        assert!(dedup_key(&item("12 24 13", "1.2", "  ", "C")).is_none());
    }

    #[test]
    fn cross_chunk_duplicate_keeps_first() {
        let c1 = chunk(1, vec![item("12 24 13", "1.2", "Product Data", "A")]);
        let mut dup = item("12 24 13", "1.2", "Product Data", "A");
        dup.text = "differently worded".into();
        let child = Bullet::child_of(&dup, "A1", "Include fabric samples.");
        let c2 = chunk(2, vec![dup, child, item("12 24 13", "1.2", "Shop Drawings", "B")]);

        let m = merge(&[c1, c2], 20);
        let ids: Vec<&str> = m.bullets.iter().map(|b| b.global_id.as_str()).collect();
        assert_eq!(ids, ["1:A", "2:A1", "2:B"]);
        assert_eq!(m.stats.bullets_before_dedup, 4);
        assert_eq!(m.stats.duplicates_removed, 1);
    }

    #[test]
    fn children_of_a_repeat_are_detached_not_dropped() {
        let header = item("12 24 13", "1.2", "Product Data", "A");
        let c1 = chunk(
            1,
            vec![header.clone(), Bullet::child_of(&header, "A1", "Item a: fabric.")],
        );
        let repeat = header.clone();
        let cont = Bullet::child_of(&repeat, "A1", "Item c: motor (continues from previous page).");
        let grandchild = Bullet::child_of(&cont, "A1a", "Include wiring diagrams.");
        let c2 = chunk(2, vec![repeat, cont, grandchild]);

        let m = merge(&[c1, c2], 20);
        let texts: Vec<&str> = m.bullets.iter().map(|b| b.bullet.text.as_str()).collect();
        assert_eq!(
            texts,
            [
                "",
                "Item a: fabric.",
                "Item c: motor (continues from previous page).",
                "Include wiring diagrams."
            ]
        );
        let cont = &m.bullets[2];
        assert_eq!((cont.global_id.as_str(), cont.global_parent_id.as_str()), ("2:A1", ""));
        assert_eq!(cont.bullet.parent_id, "");
        assert_eq!(cont.bullet.level, 2);
        assert_eq!(m.bullets[3].global_parent_id, "2:A1");
        assert_eq!(m.stats.duplicates_removed, 1);
    }

    #[test]
    fn repeated_descendant_is_dropped_on_its_own_key() {
        let header = item("12 24 13", "1.2", "Product Data", "A");
        let mut titled = Bullet::child_of(&header, "A1", "Color charts.");
        titled.submittal_title = "Samples".into();
        let c1 = chunk(1, vec![header.clone(), titled.clone()]);
        let c2 = chunk(2, vec![header, titled]);
        let m = merge(&[c1, c2], 20);
        assert_eq!(m.bullets.len(), 2);
        assert_eq!(m.stats.duplicates_removed, 2);
    }

    #[test]
    fn within_chunk_duplicates_kept() {
        let c1 = chunk(
            1,
            vec![
                item("01 33 00", "1.3", "Samples", "A"),
                item("01 33 00", "1.3", "Samples", "B"),
            ],
        );
        let m = merge(&[c1], 10);
        assert_eq!(m.bullets.len(), 2);
        assert_eq!(m.stats.duplicates_removed, 0);
    }

    #[test]
    fn untitled_bullets_never_deduplicated() {
        let a = item("09 91 23", "1.4", "", "A");
        let c1 = chunk(1, vec![a.clone()]);
        let c2 = chunk(2, vec![a]);
        assert_eq!(merge(&[c1, c2], 20).bullets.len(), 2);
    }

    #[test]
    fn results_are_ordered_by_index() {
        let c1 = chunk(1, vec![item("1", "1", "X", "A")]);
        let c2 = chunk(2, vec![item("2", "1", "Y", "A")]);
        let m = merge(&[c2, c1], 20);
        assert_eq!(m.bullets[0].chunk_index, 1);
        assert_eq!(m.bullets[1].chunk_index, 2);
    }

    #[test]
    fn parents_stay_in_chunk() {
        let parent = item("08 71 00", "1.3", "Product Data", "A");
        let child = Bullet::child_of(&parent, "A1", "Hardware schedule");
        let m = merge(&[chunk(3, vec![parent, child])], 30);
        assert_eq!(m.bullets[1].global_parent_id, "3:A");
        assert_eq!(m.bullets[1].bullet.parent_id, "A");
    }

    #[test]
    fn unresolvable_parent_is_detached() {
        let mut orphan = item("08 71 00", "1.3", "", "Z");
        orphan.level = 2;
        orphan.parent_id = "missing".into();
        let m = merge(&[chunk(1, vec![orphan])], 10);
        assert_eq!(m.bullets[0].global_parent_id, "");
        assert_eq!(m.bullets[0].bullet.parent_id, "");
    }

    #[test]
    fn parent_at_same_level_is_detached() {
        let a = item("08 71 00", "1.3", "Product Data", "A");
        let mut b = item("08 71 00", "1.3", "Shop Drawings", "B");
        b.parent_id = "A".into();
        let m = merge(&[chunk(1, vec![a, b])], 10);
        assert_eq!(m.bullets[1].global_parent_id, "");
        assert_eq!(m.bullets[1].bullet.parent_id, "");
    }

    #[test]
    fn failures_become_gaps() {
        let c1 = chunk(1, vec![item("1", "1", "X", "A")]);
        let c2 = ChunkResult::failed(
            2,
            11,
            20,
            ChunkError::JsonParse {
                chunk: 2,
                detail: "EOF".into(),
                raw_len: 5,
            },
        );
        let c3 = ChunkResult::failed(3, 21, 30, ChunkError::NotAttempted { chunk: 3 });
        let m = merge(&[c1, c2, c3], 30);
        assert!(m.partial);
        assert!(m.ceiling_exceeded);
        assert_eq!(m.stats.chunks_failed, 2);
        assert_eq!(m.stats.chunks_not_attempted, 1);
        assert_eq!(m.gaps[0].kind, "json_parse");
        assert_eq!((m.gaps[0].start_page, m.gaps[0].end_page), (11, 20));
        assert_eq!(m.stats.total_cost, 0.5);
    }

    #[test]
    fn merge_is_idempotent() {
        let parent = item("12 24 13", "1.2", "Product Data", "A");
        let child = Bullet::child_of(&parent, "A1", "Fabric");
        let c1 = chunk(1, vec![parent.clone(), child]);
        let c2 = chunk(2, vec![parent, item("12 24 13", "1.3", "Warranty", "W")]);
        let once = merge(&[c1, c2], 20);
        let twice = merge(&[once.as_chunk_result()], 20);
        assert_eq!(twice.stats.duplicates_removed, 0);
        assert_eq!(twice.bullets.len(), once.bullets.len());
        let texts = |m: &MergedResult| m.bullets.iter().map(|b| b.bullet.text.clone()).collect::<Vec<_>>();
        assert_eq!(texts(&once), texts(&twice));
    }
}
