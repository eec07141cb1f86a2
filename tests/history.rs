use std::sync::Arc;

use refstudio::{
    Adjustment, AdjustmentEngine, BlendMode, CancellationToken, EngineError, EngineSettings, Layer, LayerId,
    PixelBuffer, Project, Transform,
};

fn project_with_layers(n: usize) -> (Project, Vec<LayerId>) {
    let mut project = Project::new("doc", 16, 16).unwrap();
    let ids = (0..n)
        .map(|i| {
            let shade = (i * 40) as u8;
            project
                .push_layer(Layer::new(format!("L{}", i), PixelBuffer::filled(8, 8, [shade, 80, 200, 255])))
                .unwrap()
        })
        .collect();
    (project, ids)
}

/// Run `edit`, then check undo restores the prior stack and redo the edited one.
fn assert_reversible(project: &mut Project, edit: impl FnOnce(&mut Project)) {
    let before = project.stack().clone();
    edit(project);
    let after = project.stack().clone();
    assert_ne!(before, after, "edit changed nothing");

    project.undo().unwrap();
    assert_eq!(project.stack(), &before);
    assert!(project.stack().is_consistent());

    project.redo().unwrap();
    assert_eq!(project.stack(), &after);
    assert!(project.stack().is_consistent());
}

#[test]
fn every_layer_operation_is_reversible() {
    let (mut project, ids) = project_with_layers(3);
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    assert_reversible(&mut project, |p| {
        p.add_layer(1, Layer::new("new", PixelBuffer::filled(2, 2, [1, 2, 3, 4])))
            .unwrap();
    });
    assert_reversible(&mut project, |p| p.remove_layer(b).unwrap());
    assert_reversible(&mut project, |p| p.reorder(a, 2).unwrap());
    assert_reversible(&mut project, |p| p.set_visibility(c, false).unwrap());
    assert_reversible(&mut project, |p| p.set_opacity(a, 0.25).unwrap());
    assert_reversible(&mut project, |p| p.set_blend_mode(c, BlendMode::Overlay).unwrap());
    assert_reversible(&mut project, |p| p.rename_layer(a, "renamed").unwrap());
    assert_reversible(&mut project, |p| p.set_locked(c, true).unwrap());
    assert_reversible(&mut project, |p| {
        p.set_transform(a, Transform {
            x: 3.0,
            y: -2.0,
            scale_x: 2.0,
            scale_y: 0.5,
            rotation: 45.0,
        })
        .unwrap()
    });
    assert_reversible(&mut project, |p| {
        p.push_adjustment(a, Adjustment::temperature(0.2)).unwrap()
    });
    assert_reversible(&mut project, |p| {
        p.duplicate_layer(a).unwrap();
    });
}

#[test]
fn bake_is_one_undoable_step() {
    let (mut project, ids) = project_with_layers(1);
    let id = ids[0];
    project
        .push_adjustment(id, Adjustment::brightness_contrast(0.3, 1.0))
        .unwrap();
    let engine = AdjustmentEngine::cpu_only();

    assert_reversible(&mut project, |p| {
        p.bake_adjustments(id, &engine, &CancellationToken::new()).unwrap()
    });
    let layer = project.layer(id).unwrap();
    assert!(layer.adjustments.is_empty());
    assert_ne!(layer.buffer.pixel_rgba8(0, 0), [0, 80, 200, 255]);
    assert!(project.history().undo_description().unwrap().starts_with("Bake Adjustments"));
}

#[test]
fn baking_with_a_cancelled_token_changes_nothing() {
    let (mut project, ids) = project_with_layers(1);
    project
        .push_adjustment(ids[0], Adjustment::SharpenBlur { radius: 4, amount: -1.0 })
        .unwrap();
    let before = project.stack().clone();
    let depth = project.history().undo_count();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = project
        .bake_adjustments(ids[0], &AdjustmentEngine::cpu_only(), &cancel)
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(project.stack(), &before);
    assert_eq!(project.history().undo_count(), depth);
}

#[test]
fn depth_three_keeps_last_three() {
    let mut project = Project::new("doc", 8, 8).unwrap();
    project.apply_settings(&EngineSettings {
        max_undo_steps: 3,
        ..EngineSettings::default()
    });
    let id = project
        .push_layer(Layer::new("L", PixelBuffer::filled(4, 4, [9, 9, 9, 255])))
        .unwrap();
    for opacity in [0.8, 0.6, 0.4] {
        project.set_opacity(id, opacity).unwrap();
    }

    assert_eq!(project.history().undo_count(), 3);
    for _ in 0..3 {
        project.undo().unwrap();
    }
    assert!(matches!(project.undo(), Err(EngineError::NothingToUndo)));
    // The add was evicted, so the layer survives with the first recorded opacity undone.
    assert_eq!(project.layer(id).unwrap().opacity, 1.0);
}

#[test]
fn new_command_after_undo_clears_redo() {
    let (mut project, ids) = project_with_layers(1);
    project.set_opacity(ids[0], 0.5).unwrap();
    project.undo().unwrap();
    assert!(project.can_redo());

    project.set_visibility(ids[0], false).unwrap();
    assert!(!project.can_redo());
    assert!(matches!(project.redo(), Err(EngineError::NothingToRedo)));
}

#[test]
fn empty_history_reports_boundaries() {
    let mut project = Project::new("doc", 4, 4).unwrap();
    let undo = project.undo().unwrap_err();
    let redo = project.redo().unwrap_err();
    assert!(undo.is_history_boundary());
    assert!(redo.is_history_boundary());
}

#[test]
fn structural_errors_leave_state_untouched() {
    let (mut project, ids) = project_with_layers(2);
    let before = project.stack().clone();
    let depth = project.history().undo_count();

    let (mut other, _) = project_with_layers(4);
    let foreign = other
        .push_layer(Layer::new("x", PixelBuffer::filled(1, 1, [0, 0, 0, 255])))
        .unwrap();

    assert!(matches!(project.remove_layer(foreign), Err(EngineError::NotFound(_))));
    assert!(matches!(project.set_opacity(foreign, 0.3), Err(EngineError::NotFound(_))));
    assert!(matches!(project.reorder(ids[0], 5), Err(EngineError::OutOfRange { .. })));
    assert!(matches!(
        project.add_layer(9, Layer::new("late", PixelBuffer::filled(1, 1, [0, 0, 0, 255]))),
        Err(EngineError::OutOfRange { .. })
    ));
    assert!(matches!(project.set_opacity(ids[0], f32::NAN), Err(EngineError::InvalidParameter(_))));

    assert_eq!(project.stack(), &before);
    assert_eq!(project.history().undo_count(), depth);
}

#[test]
fn reorder_to_same_index_records_nothing() {
    let (mut project, ids) = project_with_layers(2);
    let depth = project.history().undo_count();
    project.reorder(ids[1], 1).unwrap();
    assert_eq!(project.history().undo_count(), depth);
}

#[test]
fn opacity_is_clamped() {
    let (mut project, ids) = project_with_layers(1);
    project.set_opacity(ids[0], 4.0).unwrap();
    assert_eq!(project.layer(ids[0]).unwrap().opacity, 1.0);
    project.set_opacity(ids[0], -1.0).unwrap();
    assert_eq!(project.layer(ids[0]).unwrap().opacity, 0.0);
}

#[test]
fn render_follows_undo() {
    let (mut project, ids) = project_with_layers(2);
    let pipeline = refstudio::CompositionPipeline::new(Arc::new(AdjustmentEngine::cpu_only()));
    let original = project.render(&pipeline).unwrap();

    project.set_visibility(ids[1], false).unwrap();
    assert_ne!(project.render(&pipeline).unwrap(), original);
    project.undo().unwrap();
    assert_eq!(project.render(&pipeline).unwrap(), original);
}
