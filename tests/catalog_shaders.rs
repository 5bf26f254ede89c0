use node_forge_compositor::{
    renderer::{
        uniforms::ParamLayout,
        validation::validate_wgsl_with_context,
        wgsl::build_shader_pass_module,
    },
    schema::{PainterKind, load_default_catalog},
};

#[test]
fn every_shader_pass_node_type_builds_a_valid_module() {
    let catalog = load_default_catalog().expect("load default catalog");
    let mut checked = 0;
    for spec in catalog.iter() {
        if spec.painter != PainterKind::ShaderPass {
            continue;
        }
        let source = build_shader_pass_module(spec)
            .unwrap_or_else(|e| panic!("{}: {e:#}", spec.type_path));
        validate_wgsl_with_context(&source, &spec.type_path)
            .unwrap_or_else(|e| panic!("{e:#}"));
        checked += 1;
    }
    assert!(checked >= 7, "only {checked} shader-pass node types in the catalog");
}

#[test]
fn default_parameters_pack_into_their_declared_slots() {
    let catalog = load_default_catalog().expect("load default catalog");
    for spec in catalog.iter() {
        let layout = ParamLayout::for_spec(spec);
        let node = node_forge_compositor::Node::new(1, spec.type_path.clone());
        let bytes = layout.pack(spec, &node);
        assert_eq!(
            bytes.len() as u64,
            layout.size_bytes(),
            "{}: packed size differs from the uniform buffer size",
            spec.type_path
        );
    }
}

#[test]
fn instanced_node_types_sample_an_image_input() {
    let catalog = load_default_catalog().expect("load default catalog");
    for spec in catalog.iter() {
        if matches!(spec.painter, PainterKind::Scatter | PainterKind::Tile) {
            assert!(
                spec.inputs.iter().any(|s| s.id == "image"),
                "{} has no image input",
                spec.type_path
            );
            assert!(spec.shader.is_none(), "{} carries a shader", spec.type_path);
        }
    }
}
