//! Integration tests for live queries over the record store.

use roster::seed::{self, Employee, EMPLOYEE};
use roster::{
    fields, ChangeEvent, ChannelObserver, Edit, FanOut, IndexPath, LiveQuery, QuerySpec,
    RecordInput, SectionedList, Store, StoreConfig, Transcript,
};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const PHOTO: &[u8] = b"\x89PNG\r\n\x1a\n-default-person";

fn test_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        ..Default::default()
    })
    .unwrap()
}

fn employee(name: &str, title: &str) -> RecordInput {
    RecordInput::new(EMPLOYEE)
        .with("name", name)
        .with("job_title", title)
}

fn by_title() -> QuerySpec {
    QuerySpec::new(EMPLOYEE)
        .sort_by("job_title", true)
        .sort_by("name", true)
        .section_by("job_title")
}

/// Refresh and check that replaying the edits reproduces the new snapshot.
fn refresh_checked(query: &mut LiveQuery, store: &Store) -> Vec<Edit> {
    let mut list = SectionedList::from_snapshot(query.snapshot());
    let mut transcript = Transcript::new();
    let changes = query.refresh(store, &mut transcript).unwrap();

    assert!(transcript.is_well_formed());
    list.apply(&changes, query.snapshot()).unwrap();
    assert_eq!(list, SectionedList::from_snapshot(query.snapshot()));
    changes.edits().to_vec()
}

// --- Directory Workflow ---

#[test]
fn test_directory_load_and_refresh() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    let mut query = LiveQuery::new(seed::employee_directory()).unwrap();
    query.perform_fetch(&store).unwrap();
    assert!(query.snapshot().is_empty());

    seed::reseed_sample(&store, PHOTO).unwrap();
    let edits = refresh_checked(&mut query, &store);

    // One new section plus all eleven rows.
    assert_eq!(edits[0], Edit::SectionInserted(0));
    assert_eq!(edits.len(), 12);
    assert_eq!(query.snapshot().row_count(0), 11);

    let first = query
        .record_at(&store, IndexPath::new(0, 0))
        .unwrap()
        .unwrap();
    assert_eq!(Employee::from_record(&first).unwrap().name, "Cynthia Mala");
}

#[test]
fn test_reseed_replaces_rows_one_for_one() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    seed::reseed_sample(&store, PHOTO).unwrap();

    let mut query = LiveQuery::new(seed::employee_directory()).unwrap();
    query.perform_fetch(&store).unwrap();

    // New identities for the same names: every row is deleted and reinserted,
    // the section itself survives.
    seed::reseed_sample(&store, PHOTO).unwrap();
    let edits = refresh_checked(&mut query, &store);

    let deleted = edits.iter().filter(|e| matches!(e, Edit::RowDeleted(_))).count();
    let inserted = edits.iter().filter(|e| matches!(e, Edit::RowInserted(_))).count();
    assert_eq!((deleted, inserted), (11, 11));
    assert!(!edits.iter().any(Edit::is_section_edit));
}

// --- Scripted Scenarios ---

#[test]
fn test_first_insert_into_empty_store() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    store.insert(employee("Ann", "Engineer")).unwrap();
    assert_eq!(
        refresh_checked(&mut query, &store),
        vec![Edit::SectionInserted(0), Edit::RowInserted(IndexPath::new(0, 0))]
    );
}

#[test]
fn test_deleting_one_of_two_rows() {
    let store = Store::in_memory();
    let ann = store.insert(employee("Ann", "Engineer")).unwrap();
    store.insert(employee("Bob", "Engineer")).unwrap();

    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    store.delete(ann).unwrap();
    assert_eq!(
        refresh_checked(&mut query, &store),
        vec![Edit::RowDeleted(IndexPath::new(0, 0))]
    );
}

#[test]
fn test_job_change_moves_between_sections() {
    let store = Store::in_memory();
    let ann = store.insert(employee("Ann", "Engineer")).unwrap();

    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    store.update(ann, fields([("job_title", "Manager")])).unwrap();
    assert_eq!(
        refresh_checked(&mut query, &store),
        vec![
            Edit::SectionDeleted(0),
            Edit::SectionInserted(0),
            Edit::RowMoved {
                from: IndexPath::new(0, 0),
                to: IndexPath::new(0, 0)
            },
        ]
    );
    assert_eq!(query.snapshot().section(0).unwrap().name(), "Manager");
}

#[test]
fn test_photo_change_is_an_update() {
    let store = Store::in_memory();
    let ann = store
        .insert(employee("Ann", "Engineer").with("photo", PHOTO.to_vec()))
        .unwrap();

    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    store
        .update(ann, fields([("photo", b"new photo".to_vec())]))
        .unwrap();
    assert_eq!(
        refresh_checked(&mut query, &store),
        vec![Edit::RowUpdated(IndexPath::new(0, 0))]
    );
}

#[test]
fn test_transaction_produces_one_batch() {
    let store = Store::in_memory();
    let ann = store.insert(employee("Ann", "Engineer")).unwrap();
    let bob = store.insert(employee("Bob", "Manager")).unwrap();

    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    store
        .transaction(|tx| {
            tx.delete(ann)?;
            tx.update(bob, fields([("job_title", "Engineer")]))?;
            tx.insert(employee("Cy", "Designer"))?;
            Ok(())
        })
        .unwrap();

    let mut transcript = Transcript::new();
    query.refresh(&store, &mut transcript).unwrap();
    assert_eq!(transcript.batches(), 1);

    let names: Vec<_> = query
        .snapshot()
        .sections()
        .iter()
        .map(|s| s.name())
        .collect();
    assert_eq!(names, vec!["Designer", "Engineer"]);
}

#[test]
fn test_uncommitted_writes_are_invisible() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    let mut tx = store.begin();
    tx.insert(employee("Ann", "Engineer")).unwrap();

    // A reader sees the last commit while the writer is busy.
    let snapshot = store.snapshot(query.spec()).unwrap();
    assert!(snapshot.is_empty());

    tx.rollback();
    assert!(refresh_checked(&mut query, &store).is_empty());
}

// --- Observers ---

#[test]
fn test_fan_out_to_several_observers() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();
    store.insert(employee("Ann", "Engineer")).unwrap();

    let mut first = Transcript::new();
    let mut second = Transcript::new();
    let changes = {
        let mut fan = FanOut::new().with(&mut first).with(&mut second);
        query.refresh(&store, &mut fan).unwrap()
    };

    assert_eq!(first.edits(), changes.edits());
    assert_eq!(first, second);
}

#[test]
fn test_channel_observer_feeds_another_thread() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();
    query.perform_fetch(&store).unwrap();

    let (mut observer, handle) = ChannelObserver::new();
    let consumer = thread::spawn(move || {
        let mut batches = Vec::new();
        while let Ok(batch) = handle.recv_batch() {
            batches.push(batch);
        }
        batches
    });

    store.insert(employee("Ann", "Engineer")).unwrap();
    let first = query.refresh(&store, &mut observer).unwrap();
    store.insert(employee("Bob", "Engineer")).unwrap();
    let second = query.refresh(&store, &mut observer).unwrap();
    drop(observer);

    let batches = consumer.join().unwrap();
    assert_eq!(batches, vec![first.edits().to_vec(), second.edits().to_vec()]);
}

#[test]
fn test_channel_observer_survives_vanished_consumer() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();

    let (mut observer, handle) = ChannelObserver::with_capacity(16);
    drop(handle);

    store.insert(employee("Ann", "Engineer")).unwrap();
    query.refresh(&store, &mut observer).unwrap();
    assert!(observer.is_detached());
    assert_eq!(query.snapshot().len(), 1);
}

#[test]
fn test_channel_events_in_order() {
    let store = Store::in_memory();
    let mut query = LiveQuery::new(by_title()).unwrap();
    let (mut observer, handle) = ChannelObserver::new();

    store.insert(employee("Ann", "Engineer")).unwrap();
    query.refresh(&store, &mut observer).unwrap();

    let timeout = Duration::from_millis(100);
    assert_eq!(handle.recv_timeout(timeout).unwrap(), ChangeEvent::Begin);
    assert_eq!(
        handle.recv_timeout(timeout).unwrap(),
        ChangeEvent::Edit {
            edit: Edit::SectionInserted(0)
        }
    );
    assert_eq!(
        handle.recv_timeout(timeout).unwrap(),
        ChangeEvent::Edit {
            edit: Edit::RowInserted(IndexPath::new(0, 0))
        }
    );
    assert_eq!(handle.recv_timeout(timeout).unwrap(), ChangeEvent::End);
}

// --- Concurrency ---

#[test]
fn test_readers_run_alongside_writer() {
    let store = Store::in_memory();
    seed::reseed_sample(&store, PHOTO).unwrap();
    let spec = seed::employee_directory();

    thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..20 {
                store
                    .insert(employee(&format!("Temp {:02}", i), "Contractor"))
                    .unwrap();
            }
        });

        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..20 {
                    let snapshot = store.snapshot(&spec).unwrap();
                    // Every snapshot reflects some whole number of commits.
                    assert!(snapshot.len() >= 11 && snapshot.len() <= 31);
                    assert_eq!(snapshot.len() as u64, 11 + (snapshot.sequence().0 - 1));
                }
            });
        }
    });

    assert_eq!(store.count(EMPLOYEE), 31);
}
