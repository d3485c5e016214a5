use std::ops::Range;

/// The jobs `rank` trains when `n_jobs` subsets are dealt out to a group of `size` ranks.
///
/// Every rank gets `n_jobs / size` consecutive jobs and the lowest ranks take one leftover job
/// each, so the chunks concatenated in rank order give back the job order. With more ranks than
/// jobs the last ranks train nothing.
pub fn chunk_range(n_jobs: usize, rank: usize, size: usize) -> Range<usize> {
    assert!(rank < size, "rank {rank} is outside a group of {size}");

    let (per_rank, leftover) = (n_jobs / size, n_jobs % size);
    let start = rank * per_rank + rank.min(leftover);

    start..start + per_rank + usize::from(rank < leftover)
}

/// The jobs one rank trains during one replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkChunk {
    pub rank: usize,
    pub range: Range<usize>,
}

impl WorkChunk {
    pub fn new(n_jobs: usize, rank: usize, size: usize) -> Self {
        Self {
            rank,
            range: chunk_range(n_jobs, rank, size),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The job indices, in order.
    pub fn jobs(&self) -> Range<usize> {
        self.range.clone()
    }
}

/// Every rank's chunk, ordered by rank.
pub fn chunks(n_jobs: usize, size: usize) -> Vec<WorkChunk> {
    (0..size).map(|rank| WorkChunk::new(n_jobs, rank, size)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftover_jobs_go_to_the_lowest_ranks() {
        assert_eq!(chunk_range(10, 0, 3), 0..4);
        assert_eq!(chunk_range(10, 1, 3), 4..7);
        assert_eq!(chunk_range(10, 2, 3), 7..10);
    }

    #[test]
    fn more_ranks_than_jobs() {
        let all = chunks(3, 8);

        assert_eq!(all.iter().filter(|c| c.is_empty()).count(), 5);
        assert_eq!(all[0].range, 0..1);
        assert_eq!(all[2].range, 2..3);
        assert!(all[3..].iter().all(|c| c.range == (3..3)));
    }

    #[test]
    fn chunks_tile_the_jobs() {
        for n_jobs in 0..40 {
            for size in 1..12 {
                let all = chunks(n_jobs, size);

                let mut next = 0;
                for chunk in &all {
                    assert_eq!(chunk.range.start, next);
                    assert!(chunk.len() == n_jobs / size || chunk.len() == n_jobs / size + 1);
                    next = chunk.range.end;
                }

                assert_eq!(next, n_jobs);
                assert_eq!(all.iter().map(WorkChunk::len).sum::<usize>(), n_jobs);
            }
        }
    }

    #[test]
    fn single_rank_takes_everything() {
        assert_eq!(WorkChunk::new(7, 0, 1).jobs(), 0..7);
    }
}
