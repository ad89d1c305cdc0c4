use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lunaria::{compile, CompileOptions, State, Value};

fn bench_push_pop(c: &mut Criterion) {
    let state = State::new().unwrap();

    c.bench_function("push_pop_number", |b| {
        b.iter(|| {
            state.push(black_box(42.0)).unwrap();
            state.pop().unwrap()
        });
    });

    c.bench_function("push_pop_string", |b| {
        b.iter(|| {
            state.push(black_box("the quick brown fox")).unwrap();
            state.pop().unwrap()
        });
    });
}

fn bench_table_access(c: &mut Criterion) {
    let state = State::new().unwrap();
    let table = state.create_table().unwrap();

    let mut group = c.benchmark_group("table");
    group.bench_function("set_get", |b| {
        b.iter(|| {
            table.set(black_box("key"), 1.5).unwrap();
            table.get::<f64>(black_box("key")).unwrap()
        });
    });

    for size in [16usize, 256] {
        let values: Vec<Value> = (0..size).map(|i| Value::Number(i as f64)).collect();
        group.bench_with_input(BenchmarkId::new("from_values", size), &values, |b, values| {
            b.iter(|| state.create_table_from_values(values.iter()).unwrap());
        });
    }
    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let state = State::new().unwrap();
    let bytecode = compile("return function(a, b) return a + b end", &CompileOptions::default()).unwrap();
    let add = state.execute(&bytecode, None).unwrap()[0].read::<lunaria::Function>().unwrap();

    c.bench_function("call_script_function", |b| {
        b.iter(|| add.call(&[Value::Number(1.0), Value::Number(2.0)]).unwrap());
    });

    let host = state
        .create_function("add", |s| {
            let a: f64 = s.arg(1)?;
            let b: f64 = s.arg(2)?;
            s.push(a + b)?;
            Ok(1)
        })
        .unwrap();
    c.bench_function("call_host_function", |b| {
        b.iter(|| host.call(&[Value::Number(1.0), Value::Number(2.0)]).unwrap());
    });
}

criterion_group!(benches, bench_push_pop, bench_table_access, bench_calls);
criterion_main!(benches);
