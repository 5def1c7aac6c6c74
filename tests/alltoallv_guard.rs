mod util;

use hypermesh::comm::Communicator;
use hypermesh::prelude::*;
use serial_test::serial;
use util::on_ranks;

/// Mismatched alltoallv counts are caught by the eager count exchange on
/// every rank, before any payload message is issued — no deadlock, no
/// partial transfer.
#[test]
#[serial]
fn count_mismatch_is_caught_before_payload() {
    let errors = on_ranks(2, |comm| {
        let rank = comm.rank();
        // rank 0 sends one value to rank 1; rank 1 wrongly expects two
        let (sendbuf, sendcounts, recvcounts): (Vec<i64>, Vec<usize>, Vec<usize>) = if rank == 0 {
            (vec![41], vec![0, 1], vec![0, 1])
        } else {
            (vec![], vec![0, 0], vec![2, 0])
        };
        comm.alltoallv(&sendbuf, &sendcounts, &[0, 0], &recvcounts, &[0, 0])
            .unwrap_err()
    });
    assert!(matches!(
        errors[0],
        MeshError::AlltoallvCountMismatch { peer: 1, sent: 0, expected: 1 }
    ));
    assert!(matches!(
        errors[1],
        MeshError::AlltoallvCountMismatch { peer: 0, sent: 1, expected: 2 }
    ));
}

#[test]
#[serial]
fn matching_counts_deliver_in_displacement_order() {
    let got = on_ranks(2, |comm| {
        let rank = comm.rank() as i64;
        // each rank sends (rank*10 + peer) to every peer, one value each
        let sendbuf = vec![rank * 10, rank * 10 + 1];
        comm.alltoallv(&sendbuf, &[1, 1], &[0, 1], &[1, 1], &[0, 1])
            .unwrap()
    });
    assert_eq!(got[0], vec![0, 10]);
    assert_eq!(got[1], vec![1, 11]);
}
