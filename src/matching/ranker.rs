//! Rank a query against every track of a corpus snapshot
//!
//! Scoring is an exact linear scan over precomputed features. Large
//! corpora fan out over the rayon pool; every match is computed
//! independently and the final order is a total order, so the parallel and
//! sequential paths return identical results.

use crate::config::{RankingConfig, ScoringConfig};
use crate::error::Result;
use crate::matching::corpus::CorpusSnapshot;
use crate::matching::scorer::SimilarityScorer;
use crate::types::{FeatureSet, Match, RankedResult};
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::debug;

pub struct MatchRanker {
    scorer: SimilarityScorer,
    top_n: usize,
    parallel_threshold: usize,
}

impl MatchRanker {
    pub fn new(scoring: &ScoringConfig, ranking: &RankingConfig) -> Self {
        Self {
            scorer: SimilarityScorer::new(scoring),
            top_n: ranking.top_n,
            parallel_threshold: ranking.parallel_threshold,
        }
    }

    /// Best `top_n` matches for `query`
    pub fn rank(&self, query: &FeatureSet, corpus: &CorpusSnapshot) -> Result<RankedResult> {
        self.rank_top(query, corpus, self.top_n)
    }

    /// Best `n` matches for `query`; fewer when the corpus is smaller
    pub fn rank_top(&self, query: &FeatureSet, corpus: &CorpusSnapshot, n: usize) -> Result<RankedResult> {
        query.validate()?;

        let mut matches: Vec<Match> = if corpus.len() >= self.parallel_threshold {
            corpus
                .tracks()
                .par_iter()
                .map(|track| self.scorer.score(query, track))
                .collect::<Result<_>>()?
        } else {
            corpus
                .iter()
                .map(|track| self.scorer.score(query, track))
                .collect::<Result<_>>()?
        };

        if n == 0 {
            matches.clear();
        } else if n < matches.len() {
            matches.select_nth_unstable_by(n - 1, rank_order);
            matches.truncate(n);
        }
        matches.sort_by(rank_order);

        debug!(
            "Ranked {} tracks (corpus v{}), returning {}",
            corpus.len(),
            corpus.version(),
            matches.len()
        );

        Ok(RankedResult {
            query: query.clone(),
            top_matches: matches,
            corpus_version: corpus.version(),
        })
    }
}

impl Default for MatchRanker {
    fn default() -> Self {
        Self::new(&ScoringConfig::default(), &RankingConfig::default())
    }
}

/// Descending overall score, then ascending track id
pub fn rank_order(a: &Match, b: &Match) -> Ordering {
    b.overall_score
        .total_cmp(&a.overall_score)
        .then_with(|| a.track_id.cmp(&b.track_id))
}
