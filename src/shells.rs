// Shell classification: partition the b-values of one pulse-timing group into
// discrete acquisition shells. Uses single-linkage hierarchical clustering with
// a distance cut; for 1-D values that is the same as sorting and splitting the
// sequence wherever the gap between neighbours exceeds the threshold.

/// default maximum intra-shell b-value distance in s/m^2 (50 s/mm^2)
pub const DEFAULT_MIN_B_SHELL_DISTANCE: f64 = 50e6;

/// classifies b-values into shells. Returns one shell index per input
/// measurement together with the mean b-value of every shell. Shell indices
/// start at 0 and are ordered by increasing mean b-value.
///
/// With b-values [1, 2, 3, 4, 5] and a max distance of 1 every measurement
/// lands in one shell; with [1, 2, 4, 5] the gap between 2 and 4 splits the
/// set into two shells.
pub fn classify_shells(bvalues: &[f64], max_distance: f64) -> (Vec<usize>, Vec<f64>) {
    assert!(!bvalues.is_empty(), "expected at least one b-value");
    assert!(max_distance >= 0.0, "max distance must be non-negative");

    let mut order: Vec<usize> = (0..bvalues.len()).collect();
    order.sort_by(|&a, &b| bvalues[a].total_cmp(&bvalues[b]));

    let mut shell_indices = vec![0usize; bvalues.len()];
    let mut shell_bvalues = Vec::new();

    // walk the sorted values, closing a shell at every gap wider than the
    // threshold; labels assigned in sorted order are already ordered by mean
    let mut shell = 0usize;
    let mut sum = bvalues[order[0]];
    let mut count = 1usize;
    for pair in order.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if bvalues[next] - bvalues[prev] > max_distance {
            shell_bvalues.push(sum / count as f64);
            shell += 1;
            sum = 0.0;
            count = 0;
        }
        shell_indices[next] = shell;
        sum += bvalues[next];
        count += 1;
    }
    shell_bvalues.push(sum / count as f64);

    (shell_indices, shell_bvalues)
}
