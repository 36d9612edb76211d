//! Block-size arithmetic: GCD run compression for exchange indices and
//! the default start/count partition of a global array across I/O tasks.

use log::debug;

/// Target bytes per contiguous block when partitioning an array across
/// I/O tasks. The search accepts anything within [`BLOCKSIZE_SLACK`] of
/// this.
const DEFAULT_BLOCKSIZE: usize = 1024;
const BLOCKSIZE_SLACK: usize = 256;

pub fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// GCD over an array, with the shortcut that any entry `<= 1` collapses
/// the answer to 1 immediately.
pub fn gcd_array(vals: &[i64]) -> i64 {
    for &v in vals {
        if v <= 1 {
            return 1;
        }
    }
    vals.iter().fold(0, |acc, &v| gcd(v, acc)).max(1)
}

/// Largest block size that evenly tiles a monotonically increasing index
/// sequence: chunks of `bsize` consecutive entries are always contiguous
/// runs, and `bsize` divides `arr.len()`.
///
/// The answer is the GCD of the lengths of the maximal contiguous runs,
/// further reduced by the GCD of the gaps between runs and of the first
/// entry so that block *positions* share the same granularity. Any run of
/// length 1 forces the answer to 1, as does a sequence that is not
/// ascending.
pub fn gcd_block_size(arr: &[i64]) -> i64 {
    if arr.is_empty() {
        return 1;
    }

    // Run boundaries sit wherever the delta exceeds 1.
    let deltas: Vec<i64> = arr.windows(2).map(|w| w[1] - w[0]).collect();
    let mut run_lens: Vec<i64> = Vec::new();
    let mut gaps: Vec<i64> = Vec::new();
    let mut run = 1i64;
    for &d in &deltas {
        if d == 1 {
            run += 1;
        } else {
            run_lens.push(run);
            gaps.push(d - 1);
            run = 1;
        }
    }
    run_lens.push(run);

    let mut bsize = gcd_array(&run_lens);
    if bsize > 1 && !gaps.is_empty() {
        let bsizeg = gcd_array(&gaps);
        bsize = gcd(bsize, bsizeg);
    }
    // Respect the alignment of the first index too.
    if arr[0] > 0 {
        bsize = gcd(bsize, arr[0]);
    }
    bsize
}

/// Evenly partition `gdim` elements over `ioprocs` writers; the remainder
/// goes one extra element each to the first `rem` writers.
pub fn compute_one_dim(gdim: usize, ioprocs: usize, rank: usize) -> (i64, i64) {
    let irank = rank.min(ioprocs - 1);
    let remainder = gdim % ioprocs;
    let adds = gdim / ioprocs;
    let (mut start, mut count);

    if remainder > 0 {
        if irank < remainder {
            count = (adds + 1) as i64;
            start = (irank * (adds + 1)) as i64;
        } else {
            count = adds as i64;
            start = (remainder * (adds + 1) + (irank - remainder) * adds) as i64;
        }
    } else {
        count = adds as i64;
        start = (adds * irank) as i64;
    }

    if start + count > gdim as i64 {
        count = gdim as i64 - start;
        if count < 0 {
            start = 0;
            count = 0;
        }
    }
    (start, count)
}

/// Pick this I/O task's start/count hyperslab of the global array, and
/// decide how many of the `num_io_procs` tasks actually get data.
///
/// The search starts from the task count implied by the target block
/// size, assigns each candidate task a slab by splitting the leading
/// dimensions, and shrinks the task count until the slabs tile the array
/// exactly. Tasks beyond the converged count get zero-count slabs.
///
/// Returns `(start, count, num_active_tasks)`.
pub fn calc_start_count(
    elem_size: usize,
    gdimlen: &[usize],
    num_io_procs: usize,
    my_io_rank: usize,
) -> (Vec<i64>, Vec<i64>, usize) {
    debug_assert!(!gdimlen.is_empty() && gdimlen.iter().all(|&g| g > 0));
    debug_assert!(num_io_procs > 0);

    let ndims = gdimlen.len();
    let minbytes = (DEFAULT_BLOCKSIZE - BLOCKSIZE_SLACK) as i64;
    let maxbytes = (DEFAULT_BLOCKSIZE + BLOCKSIZE_SLACK) as i64;
    let minblocksize = (minbytes / elem_size as i64).max(1);
    let pgdims: i64 = gdimlen.iter().map(|&g| g as i64).product();

    let mut use_io_procs = ((pgdims as f64 / minblocksize as f64 + 0.5) as usize)
        .min(num_io_procs)
        .max(1);

    let mut mystart = vec![0i64; ndims];
    let mut mycount = vec![0i64; ndims];
    let mut converged = false;

    while !converged {
        let mut tpsize: i64 = 0;
        let mut iorank = 0usize;
        while iorank < use_io_procs {
            let mut start = vec![0i64; ndims];
            let mut count: Vec<i64> = gdimlen.iter().map(|&g| g as i64).collect();

            // How many leading dimensions must be split to get the
            // per-task payload under the byte ceiling.
            let mut ldims = ndims - 1;
            let mut p = elem_size as i64;
            for i in (0..ndims).rev() {
                p *= gdimlen[i] as i64;
                if p / use_io_procs as i64 > maxbytes {
                    ldims = i;
                    break;
                }
            }

            if gdimlen[ldims] < use_io_procs {
                if ldims > 0 && gdimlen[ldims - 1] > use_io_procs {
                    ldims -= 1;
                } else {
                    use_io_procs -= use_io_procs % gdimlen[ldims];
                }
            }

            let mut ioprocs = use_io_procs;
            let mut tiorank = iorank;
            for i in 0..=ldims {
                if gdimlen[i] >= ioprocs {
                    let (s, c) = compute_one_dim(gdimlen[i], ioprocs, tiorank);
                    start[i] = s;
                    count[i] = c;
                } else if gdimlen[i] > 1 {
                    let tioprocs = gdimlen[i];
                    tiorank = iorank * tioprocs / ioprocs;
                    let (s, c) = compute_one_dim(gdimlen[i], tioprocs, tiorank);
                    start[i] = s;
                    count[i] = c;
                    ioprocs /= tioprocs;
                    tiorank = iorank % ioprocs;
                }
            }

            if my_io_rank == iorank {
                mystart.copy_from_slice(&start);
                mycount.copy_from_slice(&count);
            }

            let pknt: i64 = count.iter().product();
            tpsize += pknt;
            if tpsize == pgdims && use_io_procs == iorank + 1 {
                converged = true;
                break;
            } else if tpsize >= pgdims {
                break;
            }
            iorank += 1;
        }

        if !converged {
            debug!("start/count search failed with {use_io_procs} tasks, retrying");
            use_io_procs -= 1;
        }
    }

    if my_io_rank < use_io_procs {
        (mystart, mycount, use_io_procs)
    } else {
        (vec![0; ndims], vec![0; ndims], use_io_procs)
    }
}
