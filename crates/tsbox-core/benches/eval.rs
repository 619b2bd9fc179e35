// Non-foldable benchmark bodies so measured time reflects runtime evaluation
// rather than the parser constant-folding anything away (this interpreter
// does not constant-fold, but the shapes are kept parallel regardless).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tsbox_core::sandbox::{EvalOptions, Sandbox, SandboxOptions};
use tsbox_core::Value;

fn run(sandbox: &mut Sandbox, code: &str) -> Value {
    sandbox.evaluate(code, EvalOptions::default()).unwrap()
}

const ADD_TWO_LOCALS: &str = "let x = 1; let y = 2; x + y";

const ADD_TWO_LOOP_1000: &str = "
let x = 1;
let y = 2;
let total = 0;
for (let i = 0; i < 1000; i++) { total = total + x + y; }
total
";

const CLOSURE_CALL_LOOP_1000: &str = "
function makeAdder(x) { return y => x + y; }
let add = makeAdder(1);
let total = 0;
for (let i = 0; i < 1000; i++) { total = add(total); }
total
";

fn criterion_benchmark(c: &mut Criterion) {
    let mut sandbox = Sandbox::new(SandboxOptions::default()).unwrap();
    assert_eq!(run(&mut sandbox, ADD_TWO_LOCALS), Value::Number(3.0));
    c.bench_function("add_two_locals", |b| {
        b.iter(|| black_box(run(&mut sandbox, ADD_TWO_LOCALS)))
    });

    assert_eq!(run(&mut sandbox, ADD_TWO_LOOP_1000), Value::Number(3000.0));
    c.bench_function("add_two_loop_1000", |b| {
        b.iter(|| black_box(run(&mut sandbox, ADD_TWO_LOOP_1000)))
    });

    assert_eq!(run(&mut sandbox, CLOSURE_CALL_LOOP_1000), Value::Number(1000.0));
    c.bench_function("closure_call_loop_1000", |b| {
        b.iter(|| black_box(run(&mut sandbox, CLOSURE_CALL_LOOP_1000)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
