//! Object identity and slot recycling

use jsbridge_core::{EngineSession, NO_OBJECT_ID, SessionConfig, ValueType};

#[test]
fn test_managed_id_coalesces_and_slot_recycles() {
    let session = EngineSession::default();
    let id = session.create_object(5).unwrap();
    let value = session.value(id).unwrap();

    assert_eq!(session.resolve(value.clone()).unwrap(), id);
    assert_eq!(session.resolve(value.clone()).unwrap(), id);
    assert_eq!(session.managed_object_id(id).unwrap(), 5);

    assert!(session.try_dispose(id));
    assert_eq!(session.stats().recycled, 1);
    assert!(session.managed_object_id(id).unwrap_err().is_invalid_handle());

    let other = session.create_string("unrelated").unwrap();
    assert_eq!(other, id);
    assert_eq!(session.value_type(other).unwrap(), ValueType::String);
    assert_eq!(session.managed_object_id(other).unwrap(), NO_OBJECT_ID);
    assert_eq!(session.stats().identity_mappings, 0);

    // the old object gets a proxy of its own, never the recycled slot
    let again = session.resolve(value).unwrap();
    assert_ne!(again, other);
    assert_eq!(session.managed_object_id(again).unwrap(), 5);
    assert_eq!(
        session.update_value(other).unwrap().as_text().as_deref(),
        Some("unrelated")
    );
}

#[test]
fn test_values_without_managed_id_get_new_proxies() {
    let session = EngineSession::default();
    let first = session.create_string("same").unwrap();
    let value = session.value(first).unwrap();
    let second = session.resolve(value).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_connect_object_with_large_id() {
    let session = EngineSession::default();
    let id = session.create_object(NO_OBJECT_ID).unwrap();
    assert_eq!(session.connect_object(id, 1_000_000, None).unwrap(), 1_000_000);
    assert_eq!(session.managed_object_id(id).unwrap(), 1_000_000);

    let value = session.value(id).unwrap();
    assert_eq!(session.resolve(value).unwrap(), id);
}

#[test]
fn test_moving_managed_id_releases_old_mapping() {
    let session = EngineSession::default();
    let id = session.create_object(3).unwrap();
    let value = session.value(id).unwrap();

    assert_eq!(session.set_managed_object_id(id, 4).unwrap(), 4);
    assert_eq!(session.connect_object(id, 4, None).unwrap(), 4);
    assert_eq!(session.resolve(value).unwrap(), id);
    assert_eq!(session.stats().identity_mappings, 1);
}

#[test]
fn test_evicted_proxy_loses_managed_id() {
    let session = EngineSession::default();
    let a = session.create_object(40).unwrap();
    let b = session.create_object(41).unwrap();

    assert_eq!(session.set_managed_object_id(b, 40).unwrap(), 40);
    assert_eq!(session.managed_object_id(a).unwrap(), NO_OBJECT_ID);
    assert_eq!(session.managed_object_id(b).unwrap(), 40);
    assert_eq!(session.handle_info(a).unwrap().object_id, NO_OBJECT_ID);
    assert_eq!(session.stats().identity_mappings, 1);

    // disposing the evicted proxy must not drop the new owner's mapping
    assert!(session.try_dispose(a));
    assert_eq!(session.stats().identity_mappings, 1);
    assert_eq!(session.managed_object_id(b).unwrap(), 40);
}

#[test]
fn test_connect_requires_object() {
    let session = EngineSession::default();
    let number = session.create_number(2.5).unwrap();
    assert!(session.connect_object(number, 1, None).is_err());
}

#[test]
fn test_template_instances_keep_id_in_internal_field() {
    let session = EngineSession::default();
    let template = session.create_object_template().unwrap();
    let id = session.create_object_from_template(template, 12).unwrap();
    let value = session.value(id).unwrap();

    assert_eq!(session.managed_object_id(id).unwrap(), 12);
    assert_eq!(session.resolve(value).unwrap(), id);
    assert!(session.property_attributes(id, jsbridge_core::MANAGED_OBJECT_ID).unwrap().is_none());
}

#[test]
fn test_explicit_type_tag_marks_descriptor() {
    let session = EngineSession::default();
    let id = session.create_object(NO_OBJECT_ID).unwrap();
    let value = session.value(id).unwrap();
    {
        let engine = session.lock().unwrap();
        engine.set_type_tag(value.as_object().unwrap(), Some(8)).unwrap();
    }

    let descriptor = session.resolve(value).unwrap();
    assert_eq!(session.handle_info(descriptor).unwrap().type_descriptor, Some(8));
    assert!(!session.try_dispose(descriptor));
    assert!(!session.mark_disposing(descriptor));
}

#[test]
fn test_duck_typed_descriptor() {
    let source = "var t = { $__TypeID: 4, $__Value: 1 }; t";

    let session = EngineSession::default();
    let id = session.execute(source, "descriptor.js").unwrap();
    assert_eq!(session.handle_info(id).unwrap().type_descriptor, Some(4));
    assert!(!session.try_dispose(id));

    let strict = EngineSession::new(SessionConfig::default().duck_typed_type_descriptors(false));
    let id = strict.execute(source, "descriptor.js").unwrap();
    assert_eq!(strict.handle_info(id).unwrap().type_descriptor, None);
    assert!(strict.try_dispose(id));
}

#[test]
fn test_many_slots_recycle_lifo() {
    let session = EngineSession::new(SessionConfig::default().initial_handle_capacity(4));
    let ids: Vec<_> = (0..16).map(|i| session.create_integer(i).unwrap()).collect();
    for id in &ids[4..8] {
        assert!(session.try_dispose(*id));
    }

    let reused: Vec<_> = (0..4).map(|i| session.create_integer(100 + i).unwrap()).collect();
    assert_eq!(reused, vec![ids[7], ids[6], ids[5], ids[4]]);
    assert_eq!(session.stats().total_slots, 16);
}
