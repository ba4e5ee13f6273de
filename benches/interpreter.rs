use std::cell::RefCell;
use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use keikaku::voice::RecordedVoice;
use keikaku::{lexer, parser, Interpreter};

const WORKLOADS: [(&str, &str); 2] = [
    (
        "fib",
        "protocol fib(n):\n    foresee n < 2:\n        yield n\n    yield fib(n - 1) + fib(n - 2)\ndeclare(fib(15))\n",
    ),
    (
        "generators",
        "sequence pairs():\n    cycle through [1, 2, 3, 4, 5] as a:\n        cycle from 0 to 5 as b:\n            yield a * 10 + b\ng := pairs()\ncycle from 0 to 25 as n:\n    declare(proceed(g))\n",
    ),
];

fn fresh_interpreter() -> Interpreter {
    Interpreter::new(Box::new(Rc::new(RefCell::new(RecordedVoice::default()))))
}

fn bench_pipeline(c: &mut Criterion) {
    for (label, source) in WORKLOADS {
        c.bench_function(&format!("tokenize_{label}"), |b| {
            b.iter(|| {
                let tokens = lexer::tokenize(black_box(source)).expect("tokenize");
                black_box(tokens);
            })
        });

        c.bench_function(&format!("parse_{label}"), |b| {
            let tokens = lexer::tokenize(source).expect("tokenize");
            b.iter(|| {
                let program =
                    parser::parse_tokens(black_box(tokens.clone()), source).expect("parse");
                black_box(program);
            })
        });

        c.bench_function(&format!("execute_{label}"), |b| {
            let tokens = lexer::tokenize(source).expect("tokenize");
            let program = parser::parse_tokens(tokens, source).expect("parse");
            b.iter(|| {
                let mut interp = fresh_interpreter();
                let value = interp.execute(black_box(&program)).expect("execute");
                black_box(value);
            })
        });

        c.bench_function(&format!("full_pipeline_{label}"), |b| {
            b.iter(|| {
                let mut interp = fresh_interpreter();
                let value = keikaku::run_source(&mut interp, black_box(source)).expect("run");
                black_box(value);
            })
        });
    }
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
