mod common;

use common::{open_session, stored_name, stored_rows, Gadget, Widget};
use rowkeep_core::{
    is_provisional_key, EntryState, Lifecycle, ScopedService, SessionError, UNASSIGNED_KEY,
};

#[test]
fn add_stamps_envelope_and_assigns_key() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());

    let added = widgets.add(Widget::new("lamp"), true).unwrap();

    assert!(added.id > UNASSIGNED_KEY);
    assert!(added.envelope.is_active);
    assert!(!added.envelope.is_deleted);
    assert_eq!(
        added.envelope.date_created_utc,
        added.envelope.date_last_modified_utc
    );
    assert_eq!(stored_rows(&session, "widget"), 1);
}

#[test]
fn add_without_save_defers_row_until_commit() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());

    let pending = widgets.add(Widget::new("desk"), false).unwrap();
    assert!(is_provisional_key(pending.id));
    assert_eq!(
        pending.envelope.date_created_utc,
        pending.envelope.date_last_modified_utc
    );
    assert_eq!(stored_rows(&session, "widget"), 0);
    assert_eq!(widgets.pending_count().unwrap(), 1);

    let affected = widgets.commit().unwrap();

    assert_eq!(affected, 1);
    assert_eq!(stored_rows(&session, "widget"), 1);
    let stored = widgets.get_all().fetch().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id > UNASSIGNED_KEY);
    assert_eq!(stored[0].name, "desk");
    assert_eq!(widgets.pending_count().unwrap(), 0);
}

#[test]
fn add_range_shares_one_timestamp_and_keeps_rows_undeleted() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());

    widgets
        .add_range(vec![Widget::new("a"), Widget::new("b")], true)
        .unwrap();

    let rows = widgets.get_all().fetch().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].envelope.date_created_utc,
        rows[1].envelope.date_created_utc
    );
    assert!(rows.iter().all(|row| !row.envelope.is_deleted));
    assert!(rows.iter().all(|row| row.envelope.is_active));
    assert_eq!(rows[0].name, "a");
    assert_eq!(rows[1].name, "b");
}

#[test]
fn update_persists_changes_and_bumps_modified_time() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let mut widget = widgets.add(Widget::new("chair"), true).unwrap();
    let created = widget.envelope.date_created_utc;

    widget.name = "stool".to_string();
    let updated = widgets.update(widget, true).unwrap();

    assert_eq!(updated.envelope.date_created_utc, created);
    assert!(updated.envelope.date_last_modified_utc >= created);
    assert_eq!(stored_name(&session, updated.id), "stool");
}

#[test]
fn update_of_never_flushed_entity_is_not_found() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);

    let err = widgets.update(Widget::new("ghost"), true).unwrap_err();

    assert!(matches!(
        err,
        SessionError::NotFound {
            entity_type: "widget",
            key: None
        }
    ));
}

#[test]
fn deactivate_then_activate_restores_active_state() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    let widget = widgets.add(Widget::new("fan"), true).unwrap();

    let inactive = widgets.deactivate(widget, true).unwrap();
    assert!(!inactive.envelope.is_active);
    assert!(inactive.envelope.date_inactivated_utc.is_some());
    assert_eq!(inactive.envelope.lifecycle(), Lifecycle::Inactive);

    let active = widgets.activate(inactive, true).unwrap();
    assert!(active.envelope.is_active);
    assert_eq!(active.envelope.date_inactivated_utc, None);

    let reloaded = widgets.get(active.id).unwrap().unwrap();
    assert!(reloaded.envelope.is_active);
}

#[test]
fn soft_delete_keeps_row_retrievable() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let widget = widgets.add(Widget::new("shelf"), true).unwrap();

    let deleted = widgets.delete(widget, true).unwrap();

    assert!(deleted.envelope.is_deleted);
    assert!(deleted.envelope.date_flagged_for_deletion_utc.is_some());
    let fetched = widgets.get(deleted.id).unwrap().unwrap();
    assert!(fetched.envelope.is_deleted);
    assert_eq!(fetched.envelope.lifecycle(), Lifecycle::Deleted);
    assert_eq!(stored_rows(&session, "widget"), 1);
}

#[test]
fn range_lifecycle_operations_apply_to_every_element() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    widgets
        .add_range(vec![Widget::new("x"), Widget::new("y")], true)
        .unwrap();
    let rows = widgets.get_all().fetch().unwrap();

    widgets.deactivate_range(rows, true).unwrap();
    assert_eq!(widgets.get_all_active().count().unwrap(), 0);

    let rows = widgets.get_all().fetch().unwrap();
    widgets.activate_range(rows, true).unwrap();
    assert_eq!(widgets.get_all_active().count().unwrap(), 2);

    let rows = widgets.get_all().fetch().unwrap();
    widgets.delete_range(rows, true).unwrap();
    let rows = widgets.get_all().fetch().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.envelope.is_deleted));
    assert_eq!(
        rows[0].envelope.date_flagged_for_deletion_utc,
        rows[1].envelope.date_flagged_for_deletion_utc
    );
}

#[test]
fn save_adds_new_entities_and_updates_persisted_ones() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());

    let saved = widgets.save(Widget::new("rug"), true).unwrap();
    assert!(saved.id > UNASSIGNED_KEY);
    assert!(saved.envelope.is_active);
    assert_eq!(
        saved.envelope.date_created_utc,
        saved.envelope.date_last_modified_utc
    );

    let mut changed = saved.clone();
    changed.name = "carpet".to_string();
    let resaved = widgets.save(changed, true).unwrap();

    assert_eq!(resaved.id, saved.id);
    assert_eq!(resaved.envelope.date_created_utc, saved.envelope.date_created_utc);
    assert_eq!(stored_name(&session, saved.id), "carpet");
    assert_eq!(stored_rows(&session, "widget"), 1);
}

#[test]
fn save_with_stale_key_inserts_a_fresh_row() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let mut stale = Widget::new("orphan");
    stale.id = 999;

    let saved = widgets.save(stale, true).unwrap();

    assert_ne!(saved.id, 999);
    assert_eq!(stored_rows(&session, "widget"), 1);
}

#[test]
fn save_range_returns_results_in_input_order() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    let existing = widgets.add(Widget::new("old"), true).unwrap();

    let saved = widgets
        .save_range(vec![Widget::new("new"), existing.clone()], true)
        .unwrap();

    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].name, "new");
    assert_eq!(saved[1].id, existing.id);
    assert_eq!(widgets.get_all().count().unwrap(), 2);
}

#[test]
fn get_returns_none_for_unknown_key() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);

    assert_eq!(widgets.get(42).unwrap(), None);
    assert!(!widgets.exists(42).unwrap());
}

#[test]
fn queries_are_lazy_and_restartable() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    let long_names = widgets.get_all_matching(|widget: &Widget| widget.name.len() > 3);

    assert_eq!(long_names.count().unwrap(), 0);

    widgets
        .add_range(
            vec![Widget::new("cup"), Widget::new("kettle"), Widget::new("teapot")],
            true,
        )
        .unwrap();

    let names: Vec<String> = long_names
        .iter()
        .unwrap()
        .map(|widget| widget.name)
        .collect();
    assert_eq!(names, vec!["kettle".to_string(), "teapot".to_string()]);
    assert_eq!(long_names.first().unwrap().unwrap().name, "kettle");
}

#[test]
fn get_all_active_skips_deactivated_rows() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    let keep = widgets.add(Widget::new("keep"), true).unwrap();
    let drop = widgets.add(Widget::new("drop"), true).unwrap();
    widgets.deactivate(drop, true).unwrap();

    let active = widgets.get_all_active().fetch().unwrap();

    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, keep.id);
}

#[test]
fn queries_reflect_tracked_pending_values() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let mut widget = widgets.add(Widget::new("draft"), true).unwrap();

    widget.name = "final".to_string();
    widgets.update(widget.clone(), false).unwrap();

    assert_eq!(widgets.get(widget.id).unwrap().unwrap().name, "final");
    assert_eq!(widgets.get_all().first().unwrap().unwrap().name, "final");
    assert_eq!(stored_name(&session, widget.id), "draft");
}

#[test]
fn validation_failure_surfaces_as_constraint_violation() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());

    let err = widgets.add(Widget::new("  "), true).unwrap_err();

    assert!(matches!(err, SessionError::ConstraintViolation(_)));
    assert_eq!(stored_rows(&session, "widget"), 0);
    let entries = session.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, EntryState::Added);
}

#[test]
fn services_of_different_types_share_rows_table_without_key_clashes() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let gadgets = ScopedService::<Gadget, _>::new(session);

    let widget = widgets.add(Widget::new("bolt"), true).unwrap();
    let gadget = gadgets.add(Gadget::new("nut"), true).unwrap();

    assert_eq!(widgets.get(gadget.id).unwrap(), None);
    assert_eq!(gadgets.get(widget.id).unwrap(), None);
    assert_eq!(gadgets.get(gadget.id).unwrap().unwrap().label, "nut");
}

#[test]
fn save_of_pending_add_merges_into_the_same_entry() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let pending = widgets.add(Widget::new("chair"), false).unwrap();

    let saved = widgets.save(pending.clone(), false).unwrap();

    assert_eq!(saved.id, pending.id);
    let entries = session.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state, EntryState::Added);

    assert_eq!(widgets.commit().unwrap(), 1);
    assert_eq!(stored_rows(&session, "widget"), 1);
}

#[test]
fn update_of_pending_add_keeps_it_added() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let mut pending = widgets.add(Widget::new("bench"), false).unwrap();

    pending.name = "stool".to_string();
    let updated = widgets.update(pending, false).unwrap();

    assert!(is_provisional_key(updated.id));
    assert_eq!(session.entries().unwrap()[0].state, EntryState::Added);
    assert_eq!(widgets.get(updated.id).unwrap().unwrap().name, "stool");

    assert_eq!(widgets.commit().unwrap(), 1);
    let stored = widgets.get_all().fetch().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id > UNASSIGNED_KEY);
    assert_eq!(stored_name(&session, stored[0].id), "stool");
}

#[test]
fn lifecycle_changes_on_pending_add_are_flushed_with_the_insert() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session.clone());
    let pending = widgets.add(Widget::new("crate"), false).unwrap();

    let inactive = widgets.deactivate(pending, false).unwrap();
    let deleted = widgets.delete(inactive, false).unwrap();

    assert_eq!(widgets.pending_count().unwrap(), 1);
    assert_eq!(widgets.commit().unwrap(), 1);

    let stored = widgets.get_all().fetch().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].envelope.is_active);
    assert!(stored[0].envelope.is_deleted);
    assert_eq!(
        stored[0].envelope.date_flagged_for_deletion_utc,
        deleted.envelope.date_flagged_for_deletion_utc
    );
}

#[test]
fn update_of_untracked_provisional_key_is_not_found() {
    let session = open_session();
    let widgets = ScopedService::<Widget, _>::new(session);
    let pending = widgets.add(Widget::new("kite"), false).unwrap();
    widgets.undo_one(&pending).unwrap();

    let err = widgets.update(pending.clone(), false).unwrap_err();

    match err {
        SessionError::NotFound {
            entity_type: "widget",
            key: Some(key),
        } => assert_eq!(key, pending.id),
        other => panic!("unexpected error: {other}"),
    }
}
