use criterion::{Criterion, criterion_group, criterion_main};
use routelens::RouteGraph;
use routelens::extract::extract_file;
use routelens::scan::ScanOptions;
use routelens::workspace::WorkspaceStore;
use std::hint::black_box;
use std::path::Path;

const ROUTERS: usize = 40;
const ROUTES_PER_ROUTER: usize = 25;

fn write_project(root: &Path) {
    let src = root.join("src");
    std::fs::create_dir_all(src.join("routes")).unwrap();
    let mut index = String::from("import { Hono } from \"hono\";\n");
    for r in 0..ROUTERS {
        index.push_str(&format!("import r{r} from \"./routes/r{r}\";\n"));
        let mut router = String::from("import { Hono } from \"hono\";\nconst r = new Hono();\n");
        for n in 0..ROUTES_PER_ROUTER {
            router.push_str(&format!(
                "r.get(\"/item{n}/:id\", async (c) => c.json({{ id: c.req.param(\"id\"), n: {n} }}));\n"
            ));
        }
        router.push_str("export default r;\n");
        std::fs::write(src.join(format!("routes/r{r}.ts")), router).unwrap();
    }
    index.push_str("const app = new Hono();\napp.use(async (c, next) => next());\n");
    for r in 0..ROUTERS {
        index.push_str(&format!("app.route(\"/r{r}\", r{r});\n"));
    }
    std::fs::write(src.join("index.ts"), index).unwrap();
}

fn bench_extract(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let store = WorkspaceStore::load(dir.path(), &ScanOptions::new(false)).unwrap();

    c.bench_function("extract_files", |b| {
        b.iter(|| {
            for file in store.files() {
                black_box(extract_file(file));
            }
        })
    });

    let mut graph = RouteGraph::new(dir.path());
    for file in store.files() {
        graph.replace_file(extract_file(file));
    }
    c.bench_function("analyze_graph", |b| b.iter(|| black_box(graph.analyze())));
    c.bench_function("match_request", |b| {
        b.iter(|| black_box(graph.match_request("GET", "/r39/item24/abc")))
    });
}

criterion_group!(benches, bench_extract);
criterion_main!(benches);
