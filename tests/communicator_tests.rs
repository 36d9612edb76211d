//! Cross-backend communicator behavior: point-to-point ordering, the
//! collectives, and the paired exchange under every flow-control mode.

mod util;

use gridswap::comm::collective::{all_gather, all_reduce_i64, broadcast, gatherv, ReduceOp};
use gridswap::comm::{swapm, CommTag, Communicator, FlowControl, NoComm, Wait};
use util::run_ranks;

const TAG: CommTag = CommTag(0x0200);

#[test]
fn no_comm_is_a_universe_of_one() {
    assert_eq!(NoComm.rank(), 0);
    assert_eq!(NoComm.size(), 1);
    let handle = NoComm.isend(0, TAG.base(), &[1, 2, 3]);
    assert!(handle.wait().is_none());
}

#[test]
fn all_gather_orders_by_rank() {
    run_ranks(3, |comm| {
        let mine = [comm.rank() as u32 * 100, comm.rank() as u32];
        let all = all_gather(&comm, &mine, TAG).unwrap();
        assert_eq!(all, vec![0, 0, 100, 1, 200, 2]);
    });
}

#[test]
fn gatherv_handles_uneven_contributions() {
    run_ranks(3, |comm| {
        let rank = comm.rank();
        let mine: Vec<i64> = (0..rank as i64 + 1).map(|k| rank as i64 * 10 + k).collect();
        let counts = [1usize, 2, 3];
        let recvcounts = (rank == 0).then_some(&counts[..]);
        let gathered = gatherv(&comm, 0, &mine, recvcounts, TAG).unwrap();
        if rank == 0 {
            assert_eq!(gathered.unwrap(), vec![0, 10, 11, 20, 21, 22]);
        } else {
            assert!(gathered.is_none());
        }
    });
}

#[test]
fn broadcast_and_reduce_agree_everywhere() {
    run_ranks(4, |comm| {
        let rank = comm.rank();
        let mut buf = if rank == 2 { [41i64, 42] } else { [0, 0] };
        broadcast(&comm, 2, &mut buf, TAG).unwrap();
        assert_eq!(buf, [41, 42]);

        let max = all_reduce_i64(&comm, rank as i64 * 3, ReduceOp::Max, CommTag(0x0201)).unwrap();
        assert_eq!(max, 9);
        let sum = all_reduce_i64(&comm, 1, ReduceOp::Sum, CommTag(0x0202)).unwrap();
        assert_eq!(sum, 4);
    });
}

#[test]
fn split_reranks_within_groups() {
    run_ranks(4, |comm| {
        let rank = comm.rank();
        let sub = comm.split(rank % 2, rank).unwrap();
        assert_eq!(sub.size(), 2);
        assert_eq!(sub.rank(), rank / 2);

        // The child is a full communicator of its own.
        let all = all_gather(&sub, &[rank as i64], TAG).unwrap();
        let want = if rank % 2 == 0 { vec![0, 2] } else { vec![1, 3] };
        assert_eq!(all, want);
    });
}

#[test]
fn swapm_all_modes_deliver_the_same_exchange() {
    let modes = [
        FlowControl::default(),
        FlowControl {
            handshake: true,
            isend: false,
            max_pending_reqs: 1,
        },
        FlowControl {
            handshake: true,
            isend: true,
            max_pending_reqs: 2,
        },
        FlowControl {
            handshake: false,
            isend: true,
            max_pending_reqs: 3,
        },
    ];
    for (m, fc) in modes.into_iter().enumerate() {
        run_ranks(4, move |comm| {
            let rank = comm.rank();
            let ntasks = comm.size();
            // Rank r sends [r, p] to every peer p.
            let sends: Vec<Vec<i64>> = (0..ntasks)
                .map(|p| vec![rank as i64, p as i64])
                .collect();
            let recv_counts = vec![2usize; ntasks];
            let got = swapm(&comm, &sends, &recv_counts, &fc, CommTag(0x0210 + m as u16 * 4))
                .unwrap();
            for (p, msg) in got.iter().enumerate() {
                assert_eq!(msg, &vec![p as i64, rank as i64], "mode {m}");
            }
        });
    }
}
