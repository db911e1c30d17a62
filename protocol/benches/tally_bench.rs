// Governance hot-path benchmarks.
//
// Covers quorum evaluation, the in-memory tally, and a full cast_vote round
// trip through the sled transaction for vaults of increasing size.

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tontine_protocol::config::EngineConfig;
use tontine_protocol::governance::rule::evaluate;
use tontine_protocol::governance::tally::record_ballot;
use tontine_protocol::governance::{
    CastVote, GovernanceEngine, RejectionThreshold, SubmitWithdrawal, WithdrawalRequest,
    WithdrawalRule,
};
use tontine_protocol::storage::LedgerDb;

fn bench_quorum_evaluation(c: &mut Criterion) {
    c.bench_function("governance/evaluate_majority", |b| {
        b.iter(|| evaluate(WithdrawalRule::MajorityVote, 25, "bob", "alice"));
    });
}

fn bench_tally(c: &mut Criterion) {
    let template = WithdrawalRequest::pending(
        "req".into(),
        "vault".into(),
        "bob".into(),
        100,
        "bench".into(),
        None,
        u32::MAX,
        u32::MAX,
        Utc::now(),
    );

    c.bench_function("governance/record_ballot", |b| {
        b.iter_batched(
            || template.clone(),
            |mut request| {
                record_ballot(&mut request, true, RejectionThreshold::ExceedsQuorum, Utc::now())
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Creates a majority vault with `members` members and one pending request.
fn setup_vote(members: usize) -> (GovernanceEngine, String) {
    let engine = GovernanceEngine::new(
        LedgerDb::open_temporary().expect("temp db"),
        EngineConfig::default(),
    );
    let vault = engine
        .create_vault("bench", "m0", WithdrawalRule::MajorityVote)
        .expect("vault");
    for i in 1..members {
        engine.add_member(&vault.id, &format!("m{i}")).expect("member");
    }
    engine.deposit(&vault.id, "m0", 1_000_000, "seed").expect("deposit");
    let receipt = engine
        .submit_withdrawal(SubmitWithdrawal {
            vault_id: vault.id,
            requester_id: "m0".into(),
            amount: 1,
            reason: "bench".into(),
            destination_account_id: None,
        })
        .expect("submit");
    (engine, receipt.request.id)
}

fn bench_cast_vote(c: &mut Criterion) {
    let mut group = c.benchmark_group("governance/cast_vote");

    for members in [4usize, 16, 64] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &n| {
            b.iter_batched(
                || setup_vote(n),
                |(engine, request_id)| {
                    engine.cast_vote(CastVote {
                        request_id,
                        member_id: "m1".into(),
                        approve: false,
                        comment: None,
                    })
                },
                criterion::BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_quorum_evaluation, bench_tally, bench_cast_vote);
criterion_main!(benches);
