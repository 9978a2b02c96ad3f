//! Integration tests for the ingestion pipeline
//!
//! These tests validate the complete local workflow:
//! - Reporter buffers drained through the dispatch loop into storages
//! - Queries behind the flush barrier
//! - Blocking removal of reporters and storages
//! - Shutdown, pipeline persistence and the query pipe

mod common;

use common::builders::{artifact, elements, process, used, KernelBuilder};
use common::mock_helpers::StorageCalls;
use common::{test_config, test_timeout, wait_until};
use provd::query::{Query, QueryEngine, QueryResult};
use provd::types::{Element, SOURCE_REPORTER};
use provd::ControlSurface;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn one_process_one_edge() -> Vec<Element> {
    vec![
        Element::Vertex(process("1")),
        Element::Edge(used(&process("1"), &artifact("/etc/hosts"))),
    ]
}

#[test]
#[serial]
fn test_end_to_end_counts_and_vertex_query() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(StorageCalls::default());
    let host = KernelBuilder::new(test_config(dir.path()))
        .recording_storage("Recording", calls.clone())
        .scripted_reporter("Scripted", one_process_one_edge(), Arc::new(AtomicBool::new(false)))
        .start();
    let kernel = host.kernel.clone();

    kernel.add_storage("Recording", "").unwrap();
    kernel.add_reporter("Scripted", "").unwrap();

    assert!(wait_until(test_timeout(), || {
        let info = &kernel.storages()[0];
        info.vertices == 1 && info.edges == 1
    }));

    let engine = QueryEngine::new(kernel.clone());
    let query = Query::parse("query Recording vertices type:Process", false).unwrap();
    let graph = engine
        .execute(&query, false)
        .unwrap()
        .into_graph()
        .unwrap();
    assert_eq!(graph.vertex_count(), 1);
    let vertex = graph.vertices().iter().next().unwrap();
    assert_eq!(vertex.get("pid"), Some("1"));
    assert_eq!(vertex.get(SOURCE_REPORTER), Some("Scripted"));

    host.stop();
}

#[test]
#[serial]
fn test_flushes_only_on_dispatch_thread() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(StorageCalls::default());
    let host = KernelBuilder::new(test_config(dir.path()))
        .recording_storage("Recording", calls.clone())
        .start();
    host.kernel.add_storage("Recording", "").unwrap();

    let engine = QueryEngine::new(host.kernel.clone());
    let query = Query::parse("query Recording vertices type:Process", false).unwrap();
    for _ in 0..3 {
        engine.execute(&query, false).unwrap();
    }

    assert!(calls.flush_count() >= 3);
    let dispatcher = host.dispatcher_thread().unwrap();
    assert!(calls.flush_threads.lock().iter().all(|t| *t == dispatcher));
    assert_ne!(dispatcher, std::thread::current().id());

    host.stop();
}

#[test]
#[serial]
fn test_query_on_missing_storage_fails() {
    let dir = tempfile::tempdir().unwrap();
    let host = KernelBuilder::new(test_config(dir.path())).start();
    let engine = QueryEngine::new(host.kernel.clone());
    let query = Query::parse("query Memory vertices type:Process", false).unwrap();
    assert!(engine.execute(&query, false).is_err());
    host.stop();
}

#[test]
#[serial]
fn test_reporter_removal_waits_for_drain() {
    let dir = tempfile::tempdir().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let p = process("7");
    let batch: Vec<Element> = (0..250)
        .map(|i| Element::Edge(used(&p, &artifact(&format!("/tmp/{}", i)))))
        .collect();
    let host = KernelBuilder::new(test_config(dir.path()))
        .scripted_reporter("Scripted", batch, flag.clone())
        .start();
    let kernel = host.kernel.clone();
    kernel.add_storage("Memory", "").unwrap();
    kernel.add_reporter("Scripted", "").unwrap();

    assert!(kernel.remove_reporter("Scripted").unwrap());
    assert!(flag.load(Ordering::SeqCst));
    assert!(kernel.reporters().is_empty());
    // Everything pushed before removal has been committed.
    assert_eq!(kernel.storages()[0].edges, 250);
    assert!(!kernel.remove_reporter("Scripted").unwrap());

    host.stop();
}

#[test]
#[serial]
fn test_storage_removal_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(StorageCalls::default());
    let host = KernelBuilder::new(test_config(dir.path()))
        .recording_storage("Recording", calls.clone())
        .scripted_reporter("Scripted", one_process_one_edge(), Arc::new(AtomicBool::new(false)))
        .start();
    let kernel = host.kernel.clone();
    kernel.add_storage("Recording", "").unwrap();
    kernel.add_reporter("Scripted", "").unwrap();
    assert!(wait_until(test_timeout(), || kernel.storages()[0].edges == 1));

    assert_eq!(kernel.remove_storage("Recording").unwrap(), Some((1, 1)));
    assert!(calls.shut_down.load(Ordering::SeqCst));
    assert!(kernel.storages().is_empty());
    assert_eq!(kernel.remove_storage("Recording").unwrap(), None);

    host.stop();
}

#[test]
#[serial]
fn test_shutdown_saves_pipeline_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(StorageCalls::default());
    let host = KernelBuilder::new(test_config(dir.path()))
        .recording_storage("Recording", calls.clone())
        .start();
    let kernel = host.kernel.clone();
    kernel.add_storage("Recording", "").unwrap();
    kernel.add_filter("Deduplicate", 0).unwrap();

    host.stop();

    assert!(kernel.is_terminated());
    assert!(calls.shut_down.load(Ordering::SeqCst));
    let saved = std::fs::read_to_string(dir.path().join("pipeline.conf")).unwrap();
    assert!(saved.contains("filter Deduplicate 0"));
    assert!(saved.contains("storage Recording"));
}

#[test]
#[serial]
fn test_control_surface_query_output() {
    let dir = tempfile::tempdir().unwrap();
    let host = KernelBuilder::new(test_config(dir.path()))
        .scripted_reporter("Scripted", one_process_one_edge(), Arc::new(AtomicBool::new(false)))
        .start();
    let control = ControlSurface::new(host.kernel.clone());
    let mut out = Vec::new();
    control.execute("add storage Memory", &mut out);
    control.execute("add reporter Scripted", &mut out);
    assert!(wait_until(test_timeout(), || host.kernel.storages()[0].edges == 1));

    let mut out = Vec::new();
    control.execute("query Memory vertices type:Process", &mut out);
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with('['));
    assert!(text.contains("pid:1"));
    assert!(text.contains("source_reporter:Scripted"));

    let export = dir.path().join("lineage.json");
    let mut out = Vec::new();
    control.execute(
        &format!("query Memory lineage 1 3 a null {}", export.display()),
        &mut out,
    );
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!("Exported graph to {}\n", export.display())
    );
    assert!(export.exists());

    let mut out = Vec::new();
    control.execute("query Nope vertices type:Process", &mut out);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "Error: Please check query expression\n"
    );

    host.stop();
}

#[test]
#[serial]
fn test_query_pipe_answers_into_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let host = KernelBuilder::new(test_config(dir.path()))
        .scripted_reporter("Scripted", one_process_one_edge(), Arc::new(AtomicBool::new(false)))
        .start();
    let kernel = host.kernel.clone();
    kernel.add_storage("Memory", "").unwrap();
    kernel.add_reporter("Scripted", "").unwrap();
    assert!(wait_until(test_timeout(), || kernel.storages()[0].vertices == 1));

    let answer = dir.path().join("answer.txt");
    let pipe = dir.path().join("query.pipe");
    std::fs::write(
        &pipe,
        format!("{} query Memory vertices type:Process\n", answer.display()),
    )
    .unwrap();

    let control = Arc::new(ControlSurface::new(kernel.clone()));
    let worker = {
        let control = control.clone();
        let pipe = pipe.clone();
        std::thread::spawn(move || control.serve_query_pipe(&pipe))
    };

    assert!(wait_until(test_timeout(), || {
        std::fs::read_to_string(&answer).is_ok_and(|s| s.contains("pid:1") && s.ends_with("\n\n"))
    }));

    host.stop();
    worker.join().unwrap().unwrap();
}

#[test]
#[serial]
fn test_transformers_shape_query_results() {
    let dir = tempfile::tempdir().unwrap();
    let host = KernelBuilder::new(test_config(dir.path()))
        .scripted_reporter("Scripted", elements(&[used(&process("3"), &artifact("/bin/sh"))]), Arc::new(AtomicBool::new(false)))
        .start();
    let kernel = host.kernel.clone();
    kernel.add_storage("Memory", "").unwrap();
    kernel.add_transformer("Deduplicate", 0).unwrap();
    kernel.add_reporter("Scripted", "").unwrap();
    assert!(wait_until(test_timeout(), || kernel.storages()[0].edges == 1));

    let engine = QueryEngine::new(kernel.clone());
    let result = engine
        .execute(&Query::parse("query Memory vertices pid:3", false).unwrap(), false)
        .unwrap();
    match result {
        QueryResult::Graph(graph) => assert_eq!(graph.vertex_count(), 1),
        other => panic!("unexpected {:?}", other),
    }

    host.stop();
}
