use criterion::{black_box, criterion_group, criterion_main, Criterion};
use edge_http::buffer::ByteBuffer;
use edge_http::http::{Method, Status};
use edge_http::request::{HttpRequest, ParseStatus};
use edge_http::response::HttpResponse;
use edge_http::static_files::MemoryResourceProvider;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

fn benchmark_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");

    group.bench_function("append_retrieve_small", |b| {
        let data = vec![0u8; 256];
        b.iter(|| {
            let mut buffer = ByteBuffer::new(1024);
            buffer.append(black_box(&data));
            let out = buffer.retrieve_all();
            assert_eq!(out.len(), 256);
        })
    });

    group.bench_function("append_with_compaction", |b| {
        let chunk = vec![1u8; 700];
        b.iter(|| {
            let mut buffer = ByteBuffer::new(1024);
            for _ in 0..16 {
                buffer.append(black_box(&chunk));
                buffer.advance(600).unwrap();
            }
            assert_eq!(buffer.readable(), 16 * 100);
        })
    });

    group.bench_function("read_fd_4k", |b| {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let data = vec![2u8; 4096];
        let mut buffer = ByteBuffer::new(1024);
        b.iter(|| {
            tx.write_all(&data).unwrap();
            let mut total = 0;
            while total < data.len() {
                total += buffer.read_fd(rx.as_raw_fd()).unwrap();
            }
            buffer.clear();
        })
    });

    group.finish();
}

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");

    let simple_request = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    group.bench_function("parse_simple_request", |b| {
        b.iter(|| {
            let mut request = HttpRequest::new();
            let mut buffer = ByteBuffer::new(256);
            buffer.append_str(black_box(simple_request));
            assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);
            assert_eq!(request.method(), Some(Method::Get));
            assert_eq!(request.path(), "/index.html");
        })
    });

    let form_request = "POST /login HTTP/1.1\r\n\
                        Host: example.com\r\n\
                        Content-Type: application/x-www-form-urlencoded\r\n\
                        Content-Length: 32\r\n\
                        User-Agent: Benchmark\r\n\
                        Connection: keep-alive\r\n\
                        \r\n\
                        username=alice&password=s%40cret";

    group.bench_function("parse_form_request", |b| {
        b.iter(|| {
            let mut request = HttpRequest::new();
            let mut buffer = ByteBuffer::new(256);
            buffer.append_str(black_box(form_request));
            assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);
            assert_eq!(request.form_value("password"), Some("s@cret"));
            assert!(request.is_keep_alive());
        })
    });

    group.finish();
}

fn benchmark_response_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");
    let provider = MemoryResourceProvider::new().with_file("/index.html", &[b'x'; 2048]);
    let root = Path::new("/srv/www");

    group.bench_function("ok_response", |b| {
        b.iter(|| {
            let mut response = HttpResponse::new();
            response.prepare(&provider, root, black_box("/index.html"), true, Status::Ok);
            let mut buffer = ByteBuffer::new(256);
            response.make_response(&mut buffer);
            assert!(buffer.readable() > 0);
            assert_eq!(response.file_len(), 2048);
        })
    });

    group.bench_function("not_found_response", |b| {
        b.iter(|| {
            let mut response = HttpResponse::new();
            response.prepare(&provider, root, black_box("/missing.html"), true, Status::Ok);
            let mut buffer = ByteBuffer::new(256);
            response.make_response(&mut buffer);
            assert_eq!(response.status(), Status::NotFound);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_buffer,
    benchmark_http_parsing,
    benchmark_response_serialization
);
criterion_main!(benches);
