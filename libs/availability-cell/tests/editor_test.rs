use assert_matches::assert_matches;
use tokio_test::{assert_err, assert_ok};

use availability_cell::{
    generate, AvailabilityEditor, AvailabilityError, BookingPolicy, DayOfWeek, SlotQuery,
    TemplateKey, AVAILABILITY_COLLECTION, SERVICE_AVAILABILITY_COLLECTION,
};
use shared_database::{DocumentStore, MemoryStore};
use shared_models::AppError;
use shared_utils::test_utils::{date, MockStoreResponses, TestProfessional};

#[tokio::test]
async fn load_seeds_business_hours_when_nothing_is_stored() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();

    let editor = assert_ok!(AvailabilityEditor::load(&store, &professional.id).await);

    assert!(editor.default_schedule().day(DayOfWeek::Monday).enabled);
    assert!(!editor.default_schedule().day(DayOfWeek::Sunday).enabled);
    assert_eq!(editor.service_ids().count(), 0);
    assert!(!editor.is_dirty());
}

#[tokio::test]
async fn load_reads_stored_default_document() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();
    store
        .set(
            &professional.id,
            AVAILABILITY_COLLECTION,
            "default",
            MockStoreResponses::availability_default(24, "temporary_hold"),
        )
        .await
        .unwrap();

    let editor = AvailabilityEditor::load(&store, &professional.id).await.unwrap();

    assert_eq!(editor.settings().min_notice_hours, 24);
    assert_eq!(editor.settings().policy, BookingPolicy::TemporaryHold);
    assert!(!editor.default_schedule().day(DayOfWeek::Tuesday).enabled);

    // Monday 2024-01-01, 09:00-12:00, hour slots
    let slots = generate(
        &SlotQuery::new(date(2024, 1, 1), 60),
        editor.default_schedule(),
        &[],
        &[],
    )
    .unwrap();
    assert_eq!(slots.len(), 3);
}

#[tokio::test]
async fn load_rejects_stored_settings_out_of_range() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();

    let mut no_horizon = MockStoreResponses::availability_default(24, "temporary_hold");
    no_horizon["maxNoticeDays"] = 0.into();
    store
        .set(&professional.id, AVAILABILITY_COLLECTION, "default", no_horizon)
        .await
        .unwrap();
    let err = assert_err!(AvailabilityEditor::load(&store, &professional.id).await);
    assert_matches!(err, AvailabilityError::InvalidSettings(msg) if msg.contains("maxNoticeDays"));

    let mut endless_hold = MockStoreResponses::availability_default(24, "temporary_hold");
    endless_hold["advancedSettings"]["reservationHoldMinutes"] = 2000.into();
    store
        .set(&professional.id, AVAILABILITY_COLLECTION, "default", endless_hold)
        .await
        .unwrap();
    let err = assert_err!(AvailabilityEditor::load(&store, &professional.id).await);
    assert_matches!(err, AvailabilityError::InvalidSettings(msg) if msg.contains("reservationHoldMinutes"));
}

#[tokio::test]
async fn save_all_round_trips_through_the_store() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();

    let mut editor = AvailabilityEditor::load(&store, &professional.id).await.unwrap();
    editor.toggle_day(&TemplateKey::Default, DayOfWeek::Saturday);
    editor.add_interval(&TemplateKey::Default, DayOfWeek::Saturday).unwrap();
    editor.copy_default_template("massage");
    editor.toggle_day(&TemplateKey::Service("massage".to_string()), DayOfWeek::Friday);

    assert_ok!(editor.save_all(&store, &professional.id).await);
    assert!(!editor.is_dirty());
    assert_eq!(store.count(&professional.id, SERVICE_AVAILABILITY_COLLECTION).await, 1);

    let reloaded = AvailabilityEditor::load(&store, &professional.id).await.unwrap();
    assert_eq!(reloaded, editor);
    assert!(reloaded.default_schedule().day(DayOfWeek::Saturday).enabled);
    assert!(!reloaded.schedule_for("massage").day(DayOfWeek::Friday).enabled);
    assert!(reloaded.schedule_for("yoga").day(DayOfWeek::Friday).enabled);
}

#[tokio::test]
async fn failed_save_keeps_staged_edits() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();
    let mut editor = AvailabilityEditor::default();
    editor.toggle_day(&TemplateKey::Default, DayOfWeek::Sunday);

    store.inject_failure(AVAILABILITY_COLLECTION);
    let result = editor.save_all(&store, &professional.id).await;
    assert_matches!(result, Err(AvailabilityError::Store(AppError::Database(_))));
    assert!(editor.is_dirty());

    store.clear_failures();
    assert_ok!(editor.save_all(&store, &professional.id).await);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let store = MemoryStore::new();
    let first = TestProfessional::default();
    let second = TestProfessional::default();

    let mut editor = AvailabilityEditor::default();
    editor.copy_default_template("massage");
    editor.save_all(&store, &first.id).await.unwrap();

    let other = AvailabilityEditor::load(&store, &second.id).await.unwrap();
    assert_eq!(other.service_ids().count(), 0);
}

#[tokio::test]
async fn corrupt_document_surfaces_serialization_error() {
    let store = MemoryStore::new();
    let professional = TestProfessional::default();
    store
        .set(
            &professional.id,
            AVAILABILITY_COLLECTION,
            "default",
            serde_json::json!({ "workingHours": [] }),
        )
        .await
        .unwrap();

    let result = AvailabilityEditor::load(&store, &professional.id).await;
    assert_err!(&result);
    assert_matches!(result, Err(AvailabilityError::Store(AppError::Serialization(_))));
}
