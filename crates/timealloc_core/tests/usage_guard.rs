use std::cell::RefCell;
use std::collections::HashSet;
use timealloc_core::db::open_db_in_memory;
use timealloc_core::{
    AllocationEdit, AllocationKey, AllocationRepository, AllocationTotals, BatchDecision,
    Decision, Denial, DenialKind, GraphError, GraphResult, GuardError, InvalidEditReason,
    MissingEntity, NewRequest, ObservationType, Proposal, ProposalId, ProposalRepository,
    RequestGraph, RequestId, RequestRepository, SqliteAllocationRepository,
    SqliteProposalRepository, SqliteRequestGraph, SqliteRequestRepository, TimeAllocation,
    UsageGuard,
};
use uuid::Uuid;

/// In-memory graph that records every pair it was asked about.
struct RecordingGraph {
    proposal_id: ProposalId,
    used: HashSet<AllocationKey>,
    queried: RefCell<Vec<AllocationKey>>,
}

impl RecordingGraph {
    fn new(proposal_id: &str, used: &[AllocationKey]) -> Self {
        Self {
            proposal_id: ProposalId::new(proposal_id),
            used: used.iter().cloned().collect(),
            queried: RefCell::new(Vec::new()),
        }
    }

    fn queried(&self) -> Vec<AllocationKey> {
        self.queried.borrow().clone()
    }
}

impl RequestGraph for RecordingGraph {
    fn first_usage(
        &self,
        proposal_id: &ProposalId,
        key: &AllocationKey,
    ) -> GraphResult<Option<RequestId>> {
        self.queried.borrow_mut().push(key.clone());
        if *proposal_id != self.proposal_id {
            return Err(GraphError::ProposalNotFound(proposal_id.clone()));
        }
        Ok(self.used.contains(key).then(Uuid::nil))
    }
}

/// Graph whose store is unreachable.
struct BrokenGraph;

impl RequestGraph for BrokenGraph {
    fn first_usage(&self, _: &ProposalId, _: &AllocationKey) -> GraphResult<Option<RequestId>> {
        Err(GraphError::Db(rusqlite::Error::InvalidQuery.into()))
    }
}

fn allocation(proposal: &str, instrument_type: &str, semester: &str) -> TimeAllocation {
    TimeAllocation::new(
        proposal.into(),
        AllocationKey::new(instrument_type, semester),
        AllocationTotals::default(),
    )
}

fn key(instrument_type: &str, semester: &str) -> AllocationKey {
    AllocationKey::new(instrument_type, semester)
}

#[test]
fn unused_allocation_may_change_pair_or_be_deleted() {
    let graph = RecordingGraph::new("P1", &[key("IMAGER", "2024A")]);
    let guard = UsageGuard::new(&graph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    for proposed in [key("FLOYDS", "2024B"), key("NRES", "2024A"), key("x", "y")] {
        assert_eq!(
            guard.validate_mutation(Some(&floyds), &proposed).unwrap(),
            Decision::Allow
        );
    }
    assert_eq!(guard.validate_deletion(&floyds).unwrap(), Decision::Allow);
}

#[test]
fn used_allocation_denies_pair_change_and_deletion() {
    let graph = RecordingGraph::new("P1", &[key("FLOYDS", "2024A")]);
    let guard = UsageGuard::new(&graph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    let mutation = guard
        .validate_mutation(Some(&floyds), &key("IMAGER", "2024A"))
        .unwrap();
    let deletion = guard.validate_deletion(&floyds).unwrap();

    for decision in [mutation, deletion] {
        let denial = decision.denial().expect("used allocation must be denied");
        assert_eq!(denial.kind(), DenialKind::AllocationInUse);
        assert_eq!(denial.key(), Some(&key("FLOYDS", "2024A")));
    }
}

#[test]
fn accounting_only_edit_is_allowed_even_when_used() {
    let graph = RecordingGraph::new("P1", &[key("FLOYDS", "2024A")]);
    let guard = UsageGuard::new(&graph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    let decision = guard
        .validate_mutation(Some(&floyds), &key("FLOYDS", "2024A"))
        .unwrap();
    assert!(decision.is_allow());
    assert!(graph.queried().is_empty(), "unchanged pair needs no usage check");
}

#[test]
fn checks_the_current_pair_not_the_proposed_one() {
    let graph = RecordingGraph::new("P1", &[key("FLOYDS", "2024B")]);
    let guard = UsageGuard::new(&graph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    let decision = guard
        .validate_mutation(Some(&floyds), &key("FLOYDS", "2024B"))
        .unwrap();
    assert!(decision.is_allow());
    assert_eq!(graph.queried(), vec![key("FLOYDS", "2024A")]);
}

#[test]
fn unknown_proposal_denies_with_not_found() {
    let graph = RecordingGraph::new("P1", &[]);
    let guard = UsageGuard::new(&graph);
    let orphan = allocation("P9", "FLOYDS", "2024A");

    let decision = guard.validate_deletion(&orphan).unwrap();
    assert_eq!(
        decision,
        Decision::Deny(Denial::NotFound {
            proposal_id: ProposalId::new("P9"),
            missing: MissingEntity::Proposal(ProposalId::new("P9")),
        })
    );
}

#[test]
fn infrastructure_failure_is_never_an_allow() {
    let guard = UsageGuard::new(BrokenGraph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    assert!(matches!(
        guard.validate_deletion(&floyds),
        Err(GuardError::Graph(GraphError::Db(_)))
    ));
    assert!(guard
        .validate_mutation(Some(&floyds), &key("FLOYDS", "2024B"))
        .is_err());
}

#[test]
fn scenario_a_normal_group_usage_denies_semester_change() {
    let conn = open_db_in_memory().unwrap();
    let floyds = seed_single_request(&conn, ObservationType::Normal);
    let guard = UsageGuard::new(SqliteRequestGraph::new(&conn));

    let decision = guard
        .validate_mutation(Some(&floyds), &key("FLOYDS", "2024B"))
        .unwrap();
    match decision {
        Decision::Deny(Denial::AllocationInUse {
            proposal_id, key: pair, ..
        }) => {
            assert_eq!(proposal_id, ProposalId::new("P"));
            assert_eq!(pair, key("FLOYDS", "2024A"));
        }
        other => panic!("unexpected decision: {other:?}"),
    }
}

#[test]
fn scenario_b_direct_group_usage_allows_semester_change() {
    let conn = open_db_in_memory().unwrap();
    let floyds = seed_single_request(&conn, ObservationType::Direct);
    let guard = UsageGuard::new(SqliteRequestGraph::new(&conn));

    let decision = guard
        .validate_mutation(Some(&floyds), &key("FLOYDS", "2024B"))
        .unwrap();
    assert_eq!(decision, Decision::Allow);
}

#[test]
fn scenario_c_new_allocation_is_always_allowed() {
    let graph = RecordingGraph::new("P1", &[key("FLOYDS", "2024A")]);
    let guard = UsageGuard::new(&graph);

    let decision = guard.validate_mutation(None, &key("FLOYDS", "2024A")).unwrap();
    assert_eq!(decision, Decision::Allow);
    assert!(graph.queried().is_empty());
}

#[test]
fn scenario_d_batch_stops_at_first_conflict() {
    let graph = RecordingGraph::new("P1", &[key("IMAGER", "2024A")]);
    let guard = UsageGuard::new(&graph);
    let t1 = allocation("P1", "FLOYDS", "2024A");
    let t2 = allocation("P1", "IMAGER", "2024A");
    let t3 = allocation("P1", "NRES", "2024A");

    let edits = [
        AllocationEdit::update(t1, key("FLOYDS", "2024B"), AllocationTotals::default()),
        AllocationEdit::update(t2, key("IMAGER", "2024B"), AllocationTotals::default()),
        AllocationEdit::delete(t3),
    ];
    let decision = guard.validate_batch(&ProposalId::new("P1"), &edits).unwrap();

    match decision {
        BatchDecision::Deny { index, denial } => {
            assert_eq!(index, 1);
            assert_eq!(denial.kind(), DenialKind::AllocationInUse);
            assert_eq!(denial.key(), Some(&key("IMAGER", "2024A")));
        }
        other => panic!("unexpected decision: {other:?}"),
    }
    assert_eq!(
        graph.queried(),
        vec![key("FLOYDS", "2024A"), key("IMAGER", "2024A")],
        "edit after the conflict must not be evaluated"
    );
}

#[test]
fn all_allowed_batch_checks_every_edit() {
    let graph = RecordingGraph::new("P1", &[]);
    let guard = UsageGuard::new(&graph);
    let t1 = allocation("P1", "FLOYDS", "2024A");
    let t2 = allocation("P1", "IMAGER", "2024A");

    let edits = [
        AllocationEdit::create(key("NRES", "2024A"), AllocationTotals::default()),
        AllocationEdit::update(t1, key("FLOYDS", "2024B"), AllocationTotals::default()),
        AllocationEdit::delete(t2),
    ];
    let decision = guard.validate_batch(&ProposalId::new("P1"), &edits).unwrap();

    assert_eq!(decision, BatchDecision::Allow { checked: 3 });
    assert_eq!(
        graph.queried(),
        vec![key("FLOYDS", "2024A"), key("IMAGER", "2024A")]
    );
}

#[test]
fn malformed_batch_entries_are_invalid_edits() {
    let graph = RecordingGraph::new("P1", &[]);
    let guard = UsageGuard::new(&graph);
    let proposal = ProposalId::new("P1");

    let orphan_delete = AllocationEdit {
        target: None,
        action: timealloc_core::EditAction::Delete,
    };
    let blank_pair = AllocationEdit::create(key("FLOYDS", ""), AllocationTotals::default());
    let foreign = AllocationEdit::delete(allocation("P2", "FLOYDS", "2024A"));

    let cases = [
        (orphan_delete, InvalidEditReason::MissingTarget),
        (
            blank_pair,
            InvalidEditReason::InvalidKey {
                detail: "allocation pair requires a semester".to_string(),
            },
        ),
        (
            foreign,
            InvalidEditReason::ForeignProposal {
                owner: ProposalId::new("P2"),
            },
        ),
    ];
    for (edit, expected) in cases {
        let decision = guard
            .validate_batch(&proposal, &[edit, AllocationEdit::delete(allocation("P1", "X", "Y"))])
            .unwrap();
        match decision {
            BatchDecision::Deny {
                index: 0,
                denial: Denial::InvalidEdit { reason, .. },
            } => assert_eq!(reason, expected),
            other => panic!("unexpected decision: {other:?}"),
        }
    }
    assert!(graph.queried().is_empty());
}

#[test]
fn malformed_pair_on_existing_allocation_is_denied() {
    let graph = RecordingGraph::new("P1", &[]);
    let guard = UsageGuard::new(&graph);
    let floyds = allocation("P1", "FLOYDS", "2024A");

    for proposed in [key("FLOYDS", ""), key("  ", "2024B")] {
        let decision = guard.validate_mutation(Some(&floyds), &proposed).unwrap();
        match decision {
            Decision::Deny(Denial::InvalidEdit {
                proposal_id,
                key: Some(current),
                reason: InvalidEditReason::InvalidKey { .. },
            }) => {
                assert_eq!(proposal_id, ProposalId::new("P1"));
                assert_eq!(current, key("FLOYDS", "2024A"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }
    assert!(graph.queried().is_empty());
}

#[test]
fn allocation_edited_twice_in_one_batch_is_invalid() {
    let graph = RecordingGraph::new("P1", &[]);
    let guard = UsageGuard::new(&graph);
    let t1 = allocation("P1", "FLOYDS", "2024A");

    let edits = [
        AllocationEdit::update(t1.clone(), key("FLOYDS", "2024B"), AllocationTotals::default()),
        AllocationEdit::delete(t1.clone()),
    ];
    let decision = guard.validate_batch(&ProposalId::new("P1"), &edits).unwrap();

    match decision {
        BatchDecision::Deny {
            index: 1,
            denial: Denial::InvalidEdit { reason, .. },
        } => assert_eq!(
            reason,
            InvalidEditReason::DuplicateTarget {
                allocation_id: t1.id
            }
        ),
        other => panic!("unexpected decision: {other:?}"),
    }
    assert_eq!(graph.queried(), vec![key("FLOYDS", "2024A")]);
}

#[test]
fn batch_propagates_infrastructure_failure() {
    let guard = UsageGuard::new(BrokenGraph);
    let edits = [AllocationEdit::delete(allocation("P1", "FLOYDS", "2024A"))];

    assert!(guard.validate_batch(&ProposalId::new("P1"), &edits).is_err());
}

#[test]
fn denial_serializes_for_logging() {
    let denial = Denial::AllocationInUse {
        proposal_id: ProposalId::new("P1"),
        key: key("FLOYDS", "2024A"),
        request_id: Uuid::nil(),
    };
    let json = serde_json::to_value(&denial).unwrap();
    assert_eq!(json["kind"], "allocation_in_use");
    assert_eq!(json["proposal_id"], "P1");
    assert_eq!(json["key"]["instrument_type"], "FLOYDS");
    assert_eq!(json["key"]["semester"], "2024A");
}

fn seed_single_request(
    conn: &rusqlite::Connection,
    observation_type: ObservationType,
) -> TimeAllocation {
    SqliteProposalRepository::new(conn)
        .create_proposal(&Proposal::new("P", ""))
        .unwrap();
    let floyds = allocation("P", "FLOYDS", "2024A");
    SqliteAllocationRepository::new(conn)
        .create_allocation(&floyds)
        .unwrap();
    let requests = SqliteRequestRepository::new(conn);
    let group = requests
        .create_request_group(&ProposalId::new("P"), "G", observation_type)
        .unwrap();
    requests
        .create_request(group.id, &NewRequest::new(key("FLOYDS", "2024A")))
        .unwrap();
    floyds
}
