use axum::http::HeaderMap;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sp_dev_proxy::auth::{AuthResult, AuthStrategy, RequestAuth};
use sp_dev_proxy::config::SiteConfig;
use sp_dev_proxy::proxy::mutator::apply_auth_headers;
use std::collections::HashMap;

const SITE: &str = "https://sp.contoso.local/sites/dev";

fn request_auth(strategy: AuthStrategy, header_count: usize) -> RequestAuth {
    let mut headers = HashMap::new();
    headers.insert("Authorization".to_string(), "NTLM TlRMTVNTUAADAAAAGAAYAEgAAAA".to_string());
    for i in 1..header_count {
        headers.insert(format!("X-Auth-{}", i), format!("value-{}", i));
    }

    RequestAuth {
        result: AuthResult::new(headers),
        strategy,
        request_id: "bench".to_string(),
    }
}

fn benchmark_onpremise_mutation(c: &mut Criterion) {
    let auth = request_auth(AuthStrategy::OnpremiseUserCredentials, 4);

    c.bench_function("mutator_onpremise", |b| {
        b.iter(|| {
            let mut headers = HeaderMap::new();
            apply_auth_headers(black_box(&mut headers), black_box(&auth), SITE).unwrap();
            headers
        })
    });
}

fn benchmark_header_copy_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutator_copy_scale");

    for count in [1, 8, 32].iter() {
        let auth = request_auth(AuthStrategy::OnlineUserCredentials, *count);

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let mut headers = HeaderMap::new();
                apply_auth_headers(black_box(&mut headers), black_box(&auth), SITE).unwrap();
                headers
            })
        });
    }

    group.finish();
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let json = r#"{
        "siteUrl": "https://sp.contoso.local/sites/dev",
        "strategy": "OnpremiseUserCredentials",
        "authOptions": { "username": "dev", "password": "env://SP_PASSWORD", "domain": "CONTOSO" }
    }"#;

    c.bench_function("site_config_parsing", |b| {
        b.iter(|| black_box(SiteConfig::from_json(json)))
    });
}

criterion_group!(
    benches,
    benchmark_onpremise_mutation,
    benchmark_header_copy_scale,
    benchmark_config_parsing
);
criterion_main!(benches);
