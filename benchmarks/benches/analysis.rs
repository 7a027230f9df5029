//! Throughput of parsing and analyzing C# data-access code.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use efcheck::{Config, Engine};
use std::path::Path;

const REPOSITORY: &str = r#"
public class OrderRepository{n}
{
    private readonly ShopDbContext _db;

    public async Task<List<Order>> Open(int page)
    {
        return await _db.Orders
            .AsNoTracking()
            .Where(o => o.Open)
            .OrderBy(o => o.Id)
            .Skip(page * 20)
            .Take(20)
            .ToListAsync();
    }

    public void Import(List<Order> orders)
    {
        foreach (var order in orders)
        {
            var customer = _db.Customers.Find(order.CustomerId);
            _db.Orders.Add(order);
            _db.SaveChanges();
        }
    }

    public bool HasOpen() => _db.Orders.Count(o => o.Open) > 0;
}
"#;

/// A file holding `classes` repository classes.
fn source(classes: usize) -> String {
    (0..classes)
        .map(|n| REPOSITORY.replace("{n}", &n.to_string()))
        .collect()
}

fn bench_analyze_source(c: &mut Criterion) {
    let config = Config::default();
    let engine = Engine::new(&config);

    let mut group = c.benchmark_group("analyze_source");
    for classes in [1, 10, 100] {
        let source = source(classes);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(classes), &source, |b, source| {
            b.iter(|| {
                engine
                    .analyze_source(Path::new("OrderRepository.cs"), black_box(source))
                    .map(|d| d.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analyze_source);
criterion_main!(benches);
