use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use node_forge_compositor::{
    Compositor, GraphEvent, JobResult,
    material::{Material, Node, NodeId, SocketAddr},
    renderer::{
        camera::Camera,
        gpu::{GpuConfig, GpuContext},
    },
    scheduler::{NodeOutputs, ScheduledJob},
    schema::{NodeSpec, NodeSpecResolver, PainterKind, load_default_catalog},
};
use serde_json::json;

fn headless_gpu(test: &str) -> Option<Arc<GpuContext>> {
    match GpuContext::headless(GpuConfig::default()) {
        Ok(gpu) => Some(Arc::new(gpu)),
        Err(err) => {
            eprintln!("No adapter available; skipping {test}: {err:#}");
            None
        }
    }
}

fn compositor(test: &str) -> Option<Compositor> {
    let gpu = headless_gpu(test)?;
    let catalog = load_default_catalog().expect("load default catalog");
    Some(Compositor::new(gpu, Arc::new(catalog)))
}

fn connect(m: &mut Material, from: NodeId, to: NodeId, socket: &str) {
    m.connect(SocketAddr::new(from, "out"), SocketAddr::new(to, socket))
        .expect("connect");
}

fn node_result(scheduled: &[ScheduledJob], id: NodeId) -> &ScheduledJob {
    scheduled
        .iter()
        .find(|j| j.node_id() == Some(id))
        .unwrap_or_else(|| panic!("node {id} was not scheduled"))
}

fn outputs_of(job: &ScheduledJob) -> NodeOutputs {
    let ScheduledJob::Node { node_id, result } = job else {
        panic!("expected a node job");
    };
    match result.outcome() {
        Some(Ok(outputs)) => outputs,
        Some(Err(e)) => panic!("node {node_id} failed: {e}"),
        None => panic!("node {node_id} still pending"),
    }
}

/// solid(1) -> invert(2) -> output(3)
fn solid_invert_output() -> Material {
    let mut m = Material::new("m", [8, 4]);
    m.add_node(Node::new(1, "generator/solid-color").with_param("color", json!([1.0, 0.0, 0.0, 1.0])))
        .unwrap();
    m.add_node(Node::new(2, "filter/invert")).unwrap();
    m.add_node(Node::new(3, "output/material")).unwrap();
    connect(&mut m, 1, 2, "image");
    connect(&mut m, 2, 3, "in");
    m
}

#[test]
fn chain_renders_every_node_and_the_preview() {
    let Some(mut compositor) = compositor("chain_renders_every_node_and_the_preview") else {
        return;
    };
    let m = solid_invert_output();
    let scheduled = compositor.schedule_chain(&m, 1);
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.resolved, 4);

    let solid = outputs_of(node_result(&scheduled, 1));
    assert_eq!(solid["out"].dimensions(), (8, 4));
    assert_eq!(solid["out"].get_pixel(3, 2).0, [255, 0, 0, 255]);

    let inverted = outputs_of(node_result(&scheduled, 2));
    assert_eq!(inverted.keys().collect::<Vec<_>>(), vec!["out"]);
    assert_eq!(inverted["out"].get_pixel(0, 0).0, [0, 255, 255, 255]);

    let ScheduledJob::Preview(preview) = scheduled.last().unwrap() else {
        panic!("expected the preview last");
    };
    let preview = preview.outcome().expect("preview ran").expect("preview resolved");
    assert_eq!(preview.dimensions(), (8, 4));
}

#[test]
fn observers_fire_once_after_the_frame() {
    let Some(mut compositor) = compositor("observers_fire_once_after_the_frame") else {
        return;
    };
    let m = solid_invert_output();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handle = compositor.schedule_node(&m, 1).expect("node 1 exists");
    let log = seen.clone();
    handle.on_success(move |outputs| log.lock().unwrap().push(outputs.len()));
    assert!(seen.lock().unwrap().is_empty());

    compositor.run_once();
    compositor.run_once();
    assert_eq!(*seen.lock().unwrap(), vec![1]);

    let log = seen.clone();
    handle.on_success(move |_| log.lock().unwrap().push(99));
    assert_eq!(*seen.lock().unwrap(), vec![1, 99]);
}

#[test]
fn scatter_without_instances_resolves_with_a_cleared_output() {
    let Some(mut compositor) = compositor("scatter_without_instances_resolves_with_a_cleared_output")
    else {
        return;
    };
    let mut m = Material::new("m", [4, 4]);
    m.add_node(Node::new(1, "generator/solid-color")).unwrap();
    m.add_node(Node::new(2, "pattern/scatter").with_param("amount", json!(0)))
        .unwrap();
    connect(&mut m, 1, 2, "image");

    let scheduled = compositor.schedule_chain(&m, 2);
    compositor.run_once();
    let outputs = outputs_of(node_result(&scheduled, 2));
    assert!(outputs["out"].pixels().all(|p| p.0 == [0, 0, 0, 0]));
}

#[test]
fn tile_covers_the_target() {
    let Some(mut compositor) = compositor("tile_covers_the_target") else {
        return;
    };
    let mut m = Material::new("m", [8, 8]);
    m.add_node(Node::new(1, "generator/solid-color").with_param("color", json!([0.0, 1.0, 0.0, 1.0])))
        .unwrap();
    m.add_node(
        Node::new(2, "pattern/tile")
            .with_param("amountX", json!(2))
            .with_param("amountY", json!(2))
            .with_param("size", json!(1.0)),
    )
    .unwrap();
    connect(&mut m, 1, 2, "image");

    let scheduled = compositor.schedule_chain(&m, 2);
    compositor.run_once();
    let outputs = outputs_of(node_result(&scheduled, 2));
    assert!(outputs["out"].pixels().all(|p| p.0 == [0, 255, 0, 255]));
}

#[test]
fn removed_upstream_node_leaves_the_input_unbound() {
    let Some(mut compositor) = compositor("removed_upstream_node_leaves_the_input_unbound") else {
        return;
    };
    let mut m = solid_invert_output();
    compositor.schedule_chain(&m, 1);
    compositor.run_once();
    assert!(compositor.runner().cache().output_texture(&SocketAddr::new(1, "out")).is_some());

    let (_, connections) = m.remove_node(1).expect("node 1 exists");
    let scheduled = compositor.handle_event(
        &m,
        &GraphEvent::NodeRemoved {
            node_id: 1,
            connections,
        },
    );
    assert!(compositor.runner().cache().output_texture(&SocketAddr::new(1, "out")).is_none());
    assert!(!compositor.runner().cache().has_painter(1));

    compositor.run_once();
    // Inverting the transparent fallback.
    let outputs = outputs_of(node_result(&scheduled, 2));
    assert_eq!(outputs["out"].get_pixel(0, 0).0, [255, 255, 255, 0]);
    assert!(scheduled.iter().any(ScheduledJob::is_preview));
}

#[test]
fn unsupported_painter_rejects_and_keeps_cached_outputs() {
    let Some(gpu) = headless_gpu("unsupported_painter_rejects_and_keeps_cached_outputs") else {
        return;
    };
    let catalog = load_default_catalog().expect("load default catalog");
    let mut specs: HashMap<String, Arc<NodeSpec>> = HashMap::new();
    specs.insert(
        "generator/solid-color".into(),
        catalog.resolve("generator/solid-color").expect("solid color spec"),
    );
    specs.insert(
        "mystery".into(),
        Arc::new(NodeSpec::new("mystery", PainterKind::Unsupported).with_output("out")),
    );
    let mut compositor = Compositor::new(gpu, Arc::new(specs));

    let mut m = Material::new("m", [4, 4]);
    m.add_node(Node::new(1, "generator/solid-color")).unwrap();
    compositor.schedule_chain(&m, 1);
    compositor.run_once();
    let before = compositor
        .runner()
        .cache()
        .output_texture_id(&SocketAddr::new(1, "out"))
        .expect("rendered output");

    m.node_mut(1).unwrap().type_path = "mystery".into();
    let scheduled = compositor.handle_event(&m, &GraphEvent::NodeChanged(1));
    let failures = Arc::new(Mutex::new(Vec::new()));
    if let ScheduledJob::Node { result, .. } = node_result(&scheduled, 1) {
        let log = failures.clone();
        result.on_failure(move |e| log.lock().unwrap().push(e.to_string()));
    }
    let stats = compositor.run_once();

    assert_eq!(stats.rejected, 1);
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("no painter registered"), "{}", failures[0]);
    assert_eq!(
        compositor
            .runner()
            .cache()
            .output_texture_id(&SocketAddr::new(1, "out")),
        Some(before)
    );
}

#[test]
fn resizing_requires_invalidated_textures() {
    let Some(mut compositor) = compositor("resizing_requires_invalidated_textures") else {
        return;
    };
    let mut m = solid_invert_output();
    compositor.schedule_chain(&m, 1);
    compositor.run_once();

    m.output_width = 16;
    let stale = compositor.schedule_node(&m, 1).expect("node 1 exists");
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 1);
    let err = stale.outcome().expect("ran").expect_err("stale texture size");
    assert!(err.to_string().contains("invalidate textures"), "{err}");

    let scheduled = compositor.handle_event(&m, &GraphEvent::OutputSettingsChanged);
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 0);
    assert_eq!(outputs_of(node_result(&scheduled, 3))["out"].dimensions(), (16, 4));
}

#[test]
fn export_renders_outputs_at_the_requested_size() {
    let Some(mut compositor) = compositor("export_renders_outputs_at_the_requested_size") else {
        return;
    };
    let m = solid_invert_output();
    let export = compositor.export_outputs(&m, [32, 16]).expect("export");

    assert_eq!(export.outputs.keys().copied().collect::<Vec<_>>(), vec![3]);
    let out = &export.outputs[&3]["out"];
    assert_eq!(out.dimensions(), (32, 16));
    assert_eq!(out.get_pixel(31, 15).0, [0, 255, 255, 255]);
    assert_eq!(export.preview.expect("preview").dimensions(), (32, 16));

    // Live rendering continues at the material's own size.
    compositor.run_once();
    let live = compositor
        .runner()
        .cache()
        .output_texture(&SocketAddr::new(3, "out"))
        .expect("live output");
    assert_eq!(live.size, [8, 4]);
}

#[test]
fn blend_fed_twice_by_one_source_renders_once() {
    let Some(mut compositor) = compositor("blend_fed_twice_by_one_source_renders_once") else {
        return;
    };
    let mut m = Material::new("m", [4, 4]);
    m.add_node(Node::new(1, "generator/solid-color").with_param("color", json!([1.0, 0.0, 0.0, 1.0])))
        .unwrap();
    m.add_node(Node::new(2, "filter/blend")).unwrap();
    m.add_node(Node::new(3, "output/material")).unwrap();
    connect(&mut m, 1, 2, "fg");
    connect(&mut m, 1, 2, "bg");
    connect(&mut m, 2, 3, "in");

    let scheduled = compositor.schedule_chain(&m, 3);
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.resolved, 4);

    let blended = outputs_of(node_result(&scheduled, 2));
    assert_eq!(blended.len(), 1);
    assert_eq!(blended["out"].get_pixel(2, 2).0, [255, 0, 0, 255]);
}

#[test]
fn oversized_output_rejects_the_job_and_the_runner_keeps_going() {
    let Some(mut compositor) =
        compositor("oversized_output_rejects_the_job_and_the_runner_keeps_going")
    else {
        return;
    };
    let max = compositor.runner().gpu().device.limits().max_texture_dimension_2d;
    let mut m = Material::new("m", [max + 1, 4]);
    m.add_node(Node::new(1, "generator/solid-color")).unwrap();

    let node = compositor.schedule_node(&m, 1).expect("node 1 exists");
    let preview = compositor.schedule_preview(&m, Camera::default());
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 2);
    let err = node.outcome().expect("ran").expect_err("oversized node");
    assert!(err.to_string().contains("exceeds the device limit"), "{err}");
    assert!(preview.outcome().expect("ran").is_err());
    assert!(
        compositor
            .runner()
            .cache()
            .output_texture(&SocketAddr::new(1, "out"))
            .is_none()
    );

    let small = m.with_output_size([4, 4]);
    let node = compositor.schedule_node(&small, 1).expect("node 1 exists");
    let stats = compositor.run_once();
    assert_eq!(stats.rejected, 0);
    assert_eq!(outputs_of_result(&node)["out"].dimensions(), (4, 4));
}

fn outputs_of_result(result: &JobResult<NodeOutputs>) -> NodeOutputs {
    match result.outcome() {
        Some(Ok(outputs)) => outputs,
        Some(Err(e)) => panic!("job failed: {e}"),
        None => panic!("job still pending"),
    }
}
