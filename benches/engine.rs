use chrono::TimeDelta;
use criterion::{
    BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use token_ledger::engine::{AdminAdjustment, CancelTransfer, TransferDecision, TransferRequest};
use token_ledger::store::MemoryStore;
use token_ledger::{Command, Engine, LedgerConfig, Replayer, Tokens};
use uuid::Uuid;

fn email(user: u32) -> String {
    format!("user{user}@bench.io")
}

/// Generates valid replay command sequences for benchmarking.
///
/// Every user is opened and funded first, then each user in turn repeats:
/// 1. Request 10 to the next user
/// 2. The next user accepts
/// 3. Request 5 to the next user
/// 4. The next user rejects
///
/// Funding is large enough that requests never run out of tokens.
pub struct CommandGenerator {
    num_users: u32,
    cycles_per_user: u32,
    next_reference: u64,
    /// Users opened and funded so far
    setup_step: u32,
    current_user: u32,
    current_step: u32,
}

impl CommandGenerator {
    pub fn new(num_users: u32, cycles_per_user: u32) -> Self {
        assert!(num_users >= 2, "transfers need two users");
        Self {
            num_users,
            cycles_per_user,
            next_reference: 0,
            setup_step: 0,
            current_user: 0,
            current_step: 0,
        }
    }

    /// Total number of commands this generator will produce
    pub fn total_commands(&self) -> u64 {
        self.num_users as u64 * (2 + 4 * self.cycles_per_user as u64)
    }
}

impl Iterator for CommandGenerator {
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.setup_step < 2 * self.num_users {
            let user = self.setup_step / 2;
            let command = if self.setup_step % 2 == 0 {
                Command::Open { email: email(user) }
            } else {
                Command::Adjust {
                    admin: "bench".into(),
                    user: email(user),
                    amount: Tokens::new(10_000_000),
                    description: None,
                }
            };
            self.setup_step += 1;
            return Some(command);
        }

        if self.current_user >= self.num_users {
            return None;
        }

        let sender = email(self.current_user);
        let receiver = email((self.current_user + 1) % self.num_users);
        if self.current_step % 2 == 0 {
            self.next_reference += 1;
        }
        let reference = format!("t{}", self.next_reference);

        let command = match self.current_step % 4 {
            0 => Command::Request {
                sender,
                receiver,
                amount: Tokens::new(10),
                request_id: Some(reference),
            },
            1 => Command::Accept {
                receiver,
                reference,
            },
            2 => Command::Request {
                sender,
                receiver,
                amount: Tokens::new(5),
                request_id: Some(reference),
            },
            _ => Command::Reject {
                receiver,
                reference,
                reason: None,
            },
        };

        self.current_step += 1;

        // Move to next user after its cycles
        if self.current_step >= 4 * self.cycles_per_user {
            self.current_step = 0;
            self.current_user += 1;
        }

        Some(command)
    }
}

fn bench_transfer_cycles(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_cycles");

    for count in [1_000u32, 10_000, 100_000] {
        group.throughput(Throughput::Elements(
            CommandGenerator::new(2, count).total_commands(),
        ));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut replayer = Replayer::new(Engine::new());
                for command in CommandGenerator::new(2, count) {
                    let _ = black_box(replayer.apply(&command));
                }
                replayer
            });
        });
    }

    group.finish();
}

fn bench_many_users(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_users");

    for (users, cycles) in [(100, 100), (1_000, 10), (10, 1_000)] {
        let label = format!("{}u_{}cycles", users, cycles);
        group.throughput(Throughput::Elements(
            CommandGenerator::new(users, cycles).total_commands(),
        ));
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(users, cycles),
            |b, &(users, cycles)| {
                b.iter(|| {
                    let mut replayer = Replayer::new(Engine::new());
                    for command in CommandGenerator::new(users, cycles) {
                        let _ = black_box(replayer.apply(&command));
                    }
                    replayer
                });
            },
        );
    }

    group.finish();
}

fn bench_engine_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_direct");

    // request + accept + cancel without reference resolution; no cooldown so
    // the sender can keep going after each cancellation
    let config = LedgerConfig {
        cooldown: TimeDelta::zero(),
        ..LedgerConfig::default()
    };
    group.bench_function("10k_request_accept_cancel", |b| {
        b.iter(|| {
            let engine = Engine::with_store(MemoryStore::new(), config.clone());
            let admin = Uuid::new_v4();
            let alice = engine.register_account("alice@bench.io").unwrap().id();
            let bob = engine.register_account("bob@bench.io").unwrap().id();
            engine
                .admin_adjust(AdminAdjustment {
                    user: alice,
                    amount: Tokens::new(1_000_000),
                    description: None,
                    admin,
                })
                .unwrap();

            for _ in 0..10_000 {
                let tx = engine
                    .request_transfer(TransferRequest::new(alice, bob.to_string(), 3))
                    .unwrap();
                engine
                    .accept_transfer(TransferDecision::new(tx.id, bob))
                    .unwrap();
                let _ = black_box(engine.cancel_transfer(CancelTransfer {
                    transaction: tx.id,
                    admin,
                    reason: "bench".into(),
                }));
            }
            engine
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_transfer_cycles,
    bench_many_users,
    bench_engine_direct
);
criterion_main!(benches);
