//! Chunk planning: decide how a page range is cut into requests.
//!
//! Planning is pure arithmetic over page counts. Nothing here touches the
//! document bytes, so `plan` can run before any API key is configured
//! (the CLI `plan` command does exactly that).

use crate::config::{CostRates, ExtractionConfig, PageRange};
use serde::{Deserialize, Serialize};

/// Output tokens assumed per chunk when estimating cost up front.
const ESTIMATED_OUTPUT_TOKENS_PER_CHUNK: u64 = 25_000;

/// Share of the chunk budget assumed to be spent as input tokens.
const ESTIMATED_INPUT_SHARE: f64 = 0.7;

/// One planned request: an inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// 1-based position in the plan.
    pub index: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub estimated_tokens: usize,
}

impl ChunkSpec {
    pub fn page_count(&self) -> usize {
        self.end_page + 1 - self.start_page
    }
}

/// Ordered, gap-free cover of a page range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub range: PageRange,
    pub estimated_tokens: usize,
    pub chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// More than one chunk means the splitter has to run.
    pub fn needs_splitting(&self) -> bool {
        self.chunks.len() > 1
    }
}

/// Plan the chunks for `range`.
///
/// At or under `split_threshold_tokens` the whole range is one chunk.
/// Otherwise ranges of `pages_per_chunk` pages are laid end to end and the
/// last chunk takes whatever is left. A page too large for the budget on
/// its own still gets a chunk.
pub fn plan(range: PageRange, config: &ExtractionConfig) -> ChunkPlan {
    let tpp = config.tokens_per_page_estimate;
    let pages = range.len();
    let estimated_tokens = pages.saturating_mul(tpp);

    if estimated_tokens <= config.split_threshold_tokens {
        return ChunkPlan {
            range,
            estimated_tokens,
            chunks: vec![ChunkSpec {
                index: 1,
                start_page: range.start,
                end_page: range.end,
                estimated_tokens,
            }],
        };
    }

    let per_chunk = config.pages_per_chunk();
    let mut chunks = Vec::with_capacity(pages.div_ceil(per_chunk));
    let mut start = range.start;
    while start <= range.end {
        let end = (start + per_chunk - 1).min(range.end);
        chunks.push(ChunkSpec {
            index: chunks.len() + 1,
            start_page: start,
            end_page: end,
            estimated_tokens: (end + 1 - start).saturating_mul(tpp),
        });
        start = end + 1;
    }

    ChunkPlan {
        range,
        estimated_tokens,
        chunks,
    }
}

/// Up-front cost guess for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub chunks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Estimate what running `plan` will cost.
///
/// Each chunk is assumed to use 70 % of the chunk budget as input and to
/// produce 25 000 output tokens.
pub fn estimate_cost(plan: &ChunkPlan, max_tokens_per_chunk: usize, rates: &CostRates) -> CostEstimate {
    let chunks = plan.len();
    let per_chunk_input = (max_tokens_per_chunk as f64 * ESTIMATED_INPUT_SHARE).round() as u64;
    let input_tokens = per_chunk_input * chunks as u64;
    let output_tokens = ESTIMATED_OUTPUT_TOKENS_PER_CHUNK * chunks as u64;
    CostEstimate {
        chunks,
        input_tokens,
        output_tokens,
        cost: rates.cost(input_tokens, output_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExtractionConfig {
        ExtractionConfig::default()
    }

    fn assert_covers(plan: &ChunkPlan) {
        let first = plan.chunks.first().unwrap();
        let last = plan.chunks.last().unwrap();
        assert_eq!(first.start_page, plan.range.start);
        assert_eq!(last.end_page, plan.range.end);
        for pair in plan.chunks.windows(2) {
            assert_eq!(pair[0].end_page + 1, pair[1].start_page);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
    }

    #[test]
    fn small_document_is_one_chunk() {
        let p = plan(PageRange::new(1, 150), &config());
        assert_eq!(p.len(), 1);
        assert_eq!(p.chunks[0].estimated_tokens, 79_500);
        assert!(!p.needs_splitting());
    }

    #[test]
    fn exactly_at_threshold_is_not_split() {
        let c = ExtractionConfig::builder()
            .tokens_per_page_estimate(1000)
            .build()
            .unwrap();
        let p = plan(PageRange::new(1, 100), &c);
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn large_document_splits_with_remainder_last() {
        let p = plan(PageRange::new(1, 600), &config());
        // 100 000 / 530 = 188 pages per chunk.
        assert_eq!(p.len(), 4);
        assert_eq!((p.chunks[0].start_page, p.chunks[0].end_page), (1, 188));
        assert_eq!((p.chunks[3].start_page, p.chunks[3].end_page), (565, 600));
        assert_covers(&p);
        for c in &p.chunks {
            assert!(c.estimated_tokens <= 100_000);
        }
    }

    #[test]
    fn single_page_is_one_chunk() {
        let p = plan(PageRange::new(1, 1), &config());
        assert_eq!(p.len(), 1);
        assert_eq!((p.chunks[0].start_page, p.chunks[0].end_page), (1, 1));
    }

    #[test]
    fn oversized_pages_get_their_own_chunks() {
        let c = ExtractionConfig::builder()
            .tokens_per_page_estimate(150_000)
            .build()
            .unwrap();
        let p = plan(PageRange::new(1, 3), &c);
        assert_eq!(p.len(), 3);
        assert!(p.chunks.iter().all(|c| c.page_count() == 1));
        assert_covers(&p);
    }

    #[test]
    fn plan_respects_offset_range() {
        let c = ExtractionConfig::builder()
            .split_threshold_tokens(1_000)
            .max_tokens_per_chunk(5_300)
            .build()
            .unwrap();
        let p = plan(PageRange::new(120, 145), &c);
        assert_eq!(p.chunks[0].start_page, 120);
        assert_eq!(p.chunks[0].end_page, 129);
        assert_eq!(p.len(), 3);
        assert_covers(&p);
    }

    #[test]
    fn plan_is_deterministic() {
        let r = PageRange::new(1, 1234);
        assert_eq!(plan(r, &config()), plan(r, &config()));
    }

    #[test]
    fn cost_estimate_per_chunk() {
        let p = plan(PageRange::new(1, 600), &config());
        let est = estimate_cost(&p, 100_000, &CostRates::default());
        assert_eq!(est.chunks, 4);
        assert_eq!(est.input_tokens, 280_000);
        assert_eq!(est.output_tokens, 100_000);
        // 4 × (70 000 × 1.25 + 25 000 × 10) / 1M = 4 × 0.3375
        assert!((est.cost - 1.35).abs() < 1e-9);
    }
}
