//! Rank-offset matrix of page-view batches.

/// Highest ad rank represented in the rank-offset matrix.
pub const MAX_RANK: usize = 3;

/// Columns of the rank-offset matrix: the ad's own rank, then a
/// `(rank, ad index)` pair per rank.
pub const RANK_OFFSET_COLS: usize = 2 * MAX_RANK + 1;

const CMATCH_RANKED: [u32; 2] = [222, 223];

fn effective_rank(cmatch: u32, rank: u32) -> Option<usize> {
    let rank = rank as usize;
    (CMATCH_RANKED.contains(&cmatch) && (1..=MAX_RANK).contains(&rank)).then_some(rank)
}

/// Fills `out` with the `ins_num x RANK_OFFSET_COLS` rank-offset matrix.
///
/// Row `i` describes ad `i` (ads numbered across page views in batch order).
/// Column 0 is the ad's rank or `-1`. For a ranked ad, every ranked ad `k` of
/// the same page view writes its rank to column `2*(rank-1)+1` and its batch
/// index to column `2*(rank-1)+2`. Every other cell is `-1`.
///
/// `ranks` and `cmatches` are per ad; `ad_offset` holds the first ad index of
/// each page view followed by the total ad count.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn fill_rank_offset(ranks: &[i32], cmatches: &[i32], ad_offset: &[i32], out: &mut Vec<i32>) {
    let ins_num = ranks.len();
    out.clear();
    out.resize(ins_num * RANK_OFFSET_COLS, -1);

    for bounds in ad_offset.windows(2) {
        let (start, end) = (bounds[0] as usize, bounds[1] as usize);
        for index in start..end {
            let Some(rank) = effective_rank(cmatches[index] as u32, ranks[index] as u32) else {
                continue;
            };
            let row = index * RANK_OFFSET_COLS;
            out[row] = rank as i32;
            for k in start..end {
                if let Some(fast_rank) = effective_rank(cmatches[k] as u32, ranks[k] as u32) {
                    let m = fast_rank - 1;
                    out[row + 2 * m + 1] = fast_rank as i32;
                    out[row + 2 * m + 2] = k as i32;
                }
            }
        }
    }
}
