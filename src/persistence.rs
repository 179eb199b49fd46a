//! # SQLite Persistence
//!
//! [`SqliteStore`] keeps every tracking record in one SQLite database.
//! Records are stored as JSON documents next to the columns the queries
//! filter and sort on; the row id is authoritative and overrides whatever id
//! the document carries.
//!
//! Schema changes go through `rusqlite_migration`, so opening an older
//! database upgrades it in place.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, Params};
use rusqlite_migration::{Migrations, M};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{OptionExt, Result, TrackingError};
use crate::model::{
    AreaId, GeofenceViolation, LastKnownLocation, LocationSample, RestrictedArea, RouteSegment,
    SegmentClose, SegmentId, Trip, TripId, UserId, ViolationId,
};
use crate::store::{
    apply_segment_close, check_segment_close, SampleCounts, TrackingStore, TripTransition,
};

const SCHEMA_V1: &str = r#"
    CREATE TABLE trips (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        tracking_active INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_trips_active ON trips(tracking_active);

    -- Append-only; seq preserves arrival order
    CREATE TABLE location_samples (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        trip_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        is_waypoint INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_samples_trip_time ON location_samples(trip_id, timestamp);

    CREATE TABLE last_known_locations (
        trip_id INTEGER PRIMARY KEY,
        data TEXT NOT NULL
    );

    CREATE TABLE route_segments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        trip_id INTEGER NOT NULL,
        start_timestamp INTEGER NOT NULL,
        is_completed INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_segments_trip ON route_segments(trip_id, start_timestamp);
    CREATE UNIQUE INDEX idx_segments_one_open
        ON route_segments(trip_id) WHERE is_completed = 0;

    CREATE TABLE restricted_areas (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        data TEXT NOT NULL
    );

    CREATE TABLE geofence_violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        trip_id INTEGER,
        detected_at INTEGER NOT NULL,
        resolved INTEGER NOT NULL DEFAULT 0,
        data TEXT NOT NULL
    );
    CREATE INDEX idx_violations_user ON geofence_violations(user_id, detected_at);
    CREATE INDEX idx_violations_trip ON geofence_violations(trip_id, detected_at);
    CREATE INDEX idx_violations_open ON geofence_violations(resolved);
"#;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA_V1)])
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Run `sql` selecting `(id, data)` and decode each document, letting
/// `assign` stamp the row id onto it.
fn load_rows<T, P>(conn: &Connection, sql: &str, params: P, assign: fn(&mut T, i64)) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, data)| {
            let mut value: T = serde_json::from_str(&data)?;
            assign(&mut value, id);
            Ok(value)
        })
        .collect()
}

fn load_row<T, P>(conn: &Connection, sql: &str, params: P, assign: fn(&mut T, i64)) -> Result<Option<T>>
where
    T: DeserializeOwned,
    P: Params,
{
    Ok(load_rows(conn, sql, params, assign)?.into_iter().next())
}

fn set_trip_id(trip: &mut Trip, id: i64) {
    trip.id = TripId(id);
}

fn set_seq(sample: &mut LocationSample, seq: i64) {
    sample.seq = seq;
}

fn keep_id<T>(_: &mut T, _: i64) {}

fn set_segment_id(segment: &mut RouteSegment, id: i64) {
    segment.id = SegmentId(id);
}

fn set_area_id(area: &mut RestrictedArea, id: i64) {
    area.id = AreaId(id);
}

fn set_violation_id(violation: &mut GeofenceViolation, id: i64) {
    violation.id = ViolationId(id);
}

fn segment_by_id(conn: &Connection, id: SegmentId) -> Result<Option<RouteSegment>> {
    load_row(
        conn,
        "SELECT id, data FROM route_segments WHERE id = ?1",
        params![id.0],
        set_segment_id,
    )
}

fn open_segment_in(conn: &Connection, trip_id: TripId) -> Result<Option<RouteSegment>> {
    load_row(
        conn,
        "SELECT id, data FROM route_segments WHERE trip_id = ?1 AND is_completed = 0",
        params![trip_id.0],
        set_segment_id,
    )
}

fn insert_segment_in(conn: &Connection, segment: &RouteSegment) -> Result<SegmentId> {
    if let Some(open) = open_segment_in(conn, segment.trip_id)? {
        return Err(TrackingError::SegmentAlreadyOpen {
            trip_id: segment.trip_id.0,
            segment_id: open.id.0,
        });
    }
    conn.execute(
        "INSERT INTO route_segments (trip_id, start_timestamp, is_completed, data)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            segment.trip_id.0,
            segment.start_timestamp,
            segment.is_completed,
            encode(segment)?
        ],
    )?;
    Ok(SegmentId(conn.last_insert_rowid()))
}

fn complete_segment_in(conn: &Connection, id: SegmentId, close: &SegmentClose) -> Result<RouteSegment> {
    let mut segment = segment_by_id(conn, id)?.or_not_found("segment", id.0)?;
    check_segment_close(&segment, close)?;
    apply_segment_close(&mut segment, close);
    conn.execute(
        "UPDATE route_segments SET is_completed = 1, data = ?1 WHERE id = ?2",
        params![encode(&segment)?, id.0],
    )?;
    Ok(segment)
}

fn update_trip_in(conn: &Connection, trip: &Trip) -> Result<()> {
    let changed = conn.execute(
        "UPDATE trips SET user_id = ?1, tracking_active = ?2, data = ?3 WHERE id = ?4",
        params![trip.user_id.0, trip.tracking_active, encode(trip)?, trip.id.0],
    )?;
    if changed == 0 {
        return Err(TrackingError::NotFound {
            entity: "trip",
            id: trip.id.0,
        });
    }
    Ok(())
}

fn violation_by_id(conn: &Connection, id: ViolationId) -> Result<Option<GeofenceViolation>> {
    load_row(
        conn,
        "SELECT id, data FROM geofence_violations WHERE id = ?1",
        params![id.0],
        set_violation_id,
    )
}

/// SQLite-backed [`TrackingStore`].
///
/// A single connection serialized behind a mutex. Multi-row writes run in a
/// transaction so readers never see half of a transition.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and bring its schema up to date.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        log::info!("[SqliteStore] Opened database at {}", path.display());
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        migrations().to_latest(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TrackingError::storage("database connection lock poisoned"))
    }

    fn violations_where(&self, filter: &str, value: Option<i64>) -> Result<Vec<GeofenceViolation>> {
        let sql = format!(
            "SELECT id, data FROM geofence_violations WHERE {filter} ORDER BY detected_at DESC, id DESC"
        );
        let conn = self.conn()?;
        match value {
            Some(value) => load_rows(&conn, &sql, params![value], set_violation_id),
            None => load_rows(&conn, &sql, [], set_violation_id),
        }
    }
}

impl TrackingStore for SqliteStore {
    fn insert_trip(&self, mut trip: Trip) -> Result<Trip> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trips (user_id, tracking_active, data) VALUES (?1, ?2, ?3)",
            params![trip.user_id.0, trip.tracking_active, encode(&trip)?],
        )?;
        trip.id = TripId(conn.last_insert_rowid());
        Ok(trip)
    }

    fn get_trip(&self, id: TripId) -> Result<Option<Trip>> {
        load_row(
            &*self.conn()?,
            "SELECT id, data FROM trips WHERE id = ?1",
            params![id.0],
            set_trip_id,
        )
    }

    fn update_trip(&self, trip: &Trip) -> Result<()> {
        update_trip_in(&*self.conn()?, trip)
    }

    fn active_trips(&self) -> Result<Vec<Trip>> {
        load_rows(
            &*self.conn()?,
            "SELECT id, data FROM trips WHERE tracking_active = 1 ORDER BY id",
            [],
            set_trip_id,
        )
    }

    fn append_sample(&self, mut sample: LocationSample) -> Result<LocationSample> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO location_samples (trip_id, timestamp, is_waypoint, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sample.trip_id.0,
                sample.timestamp,
                sample.is_waypoint,
                encode(&sample)?
            ],
        )?;
        sample.seq = tx.last_insert_rowid();

        let existing: Option<LastKnownLocation> = load_row(
            &tx,
            "SELECT trip_id, data FROM last_known_locations WHERE trip_id = ?1",
            params![sample.trip_id.0],
            keep_id,
        )?;
        let last = LastKnownLocation::merged(existing, &sample);
        tx.execute(
            "INSERT INTO last_known_locations (trip_id, data) VALUES (?1, ?2)
             ON CONFLICT(trip_id) DO UPDATE SET data = excluded.data",
            params![sample.trip_id.0, encode(&last)?],
        )?;

        tx.commit()?;
        Ok(sample)
    }

    fn samples_for_trip(
        &self,
        trip_id: TripId,
        from: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<LocationSample>> {
        load_rows(
            &*self.conn()?,
            "SELECT seq, data FROM location_samples
             WHERE trip_id = ?1
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR timestamp <= ?3)
             ORDER BY seq",
            params![trip_id.0, from, until],
            set_seq,
        )
    }

    fn sample_counts(&self, trip_id: TripId) -> Result<SampleCounts> {
        let (total, waypoints): (i64, i64) = self.conn()?.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_waypoint), 0) FROM location_samples WHERE trip_id = ?1",
            params![trip_id.0],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(SampleCounts {
            total: total as usize,
            waypoints: waypoints as usize,
        })
    }

    fn last_known(&self, trip_id: TripId) -> Result<Option<LastKnownLocation>> {
        load_row(
            &*self.conn()?,
            "SELECT trip_id, data FROM last_known_locations WHERE trip_id = ?1",
            params![trip_id.0],
            keep_id,
        )
    }

    fn last_known_many(&self, trip_ids: &[TripId]) -> Result<HashMap<TripId, LastKnownLocation>> {
        if trip_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; trip_ids.len()].join(", ");
        let sql = format!(
            "SELECT trip_id, data FROM last_known_locations WHERE trip_id IN ({placeholders})"
        );
        let rows: Vec<LastKnownLocation> = load_rows(
            &*self.conn()?,
            &sql,
            params_from_iter(trip_ids.iter().map(|id| id.0)),
            keep_id,
        )?;
        Ok(rows.into_iter().map(|row| (row.trip_id, row)).collect())
    }

    fn insert_segment(&self, mut segment: RouteSegment) -> Result<RouteSegment> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        segment.id = insert_segment_in(&tx, &segment)?;
        tx.commit()?;
        Ok(segment)
    }

    fn get_segment(&self, id: SegmentId) -> Result<Option<RouteSegment>> {
        segment_by_id(&*self.conn()?, id)
    }

    fn open_segment(&self, trip_id: TripId) -> Result<Option<RouteSegment>> {
        open_segment_in(&*self.conn()?, trip_id)
    }

    fn segments_for_trip(&self, trip_id: TripId) -> Result<Vec<RouteSegment>> {
        load_rows(
            &*self.conn()?,
            "SELECT id, data FROM route_segments WHERE trip_id = ?1 ORDER BY start_timestamp, id",
            params![trip_id.0],
            set_segment_id,
        )
    }

    fn complete_segment(&self, id: SegmentId, close: &SegmentClose) -> Result<RouteSegment> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let segment = complete_segment_in(&tx, id, close)?;
        tx.commit()?;
        Ok(segment)
    }

    fn commit_transition(&self, transition: TripTransition) -> Result<Option<SegmentId>> {
        let mut conn = self.conn()?;
        // Dropping the transaction on any early return rolls it back
        let tx = conn.transaction()?;

        if let Some((id, close)) = &transition.close {
            complete_segment_in(&tx, *id, close)?;
        }
        let opened = match &transition.open {
            Some(segment) => Some(insert_segment_in(&tx, segment)?),
            None => None,
        };
        update_trip_in(&tx, &transition.trip)?;

        tx.commit()?;
        Ok(opened)
    }

    fn save_area(&self, mut area: RestrictedArea) -> Result<RestrictedArea> {
        let conn = self.conn()?;
        if area.id == AreaId::default() {
            conn.execute(
                "INSERT INTO restricted_areas (data) VALUES (?1)",
                params![encode(&area)?],
            )?;
            area.id = AreaId(conn.last_insert_rowid());
        } else {
            let changed = conn.execute(
                "UPDATE restricted_areas SET data = ?1 WHERE id = ?2",
                params![encode(&area)?, area.id.0],
            )?;
            if changed == 0 {
                return Err(TrackingError::NotFound {
                    entity: "area",
                    id: area.id.0,
                });
            }
        }
        Ok(area)
    }

    fn get_area(&self, id: AreaId) -> Result<Option<RestrictedArea>> {
        load_row(
            &*self.conn()?,
            "SELECT id, data FROM restricted_areas WHERE id = ?1",
            params![id.0],
            set_area_id,
        )
    }

    fn list_areas(&self) -> Result<Vec<RestrictedArea>> {
        load_rows(
            &*self.conn()?,
            "SELECT id, data FROM restricted_areas ORDER BY id",
            [],
            set_area_id,
        )
    }

    fn delete_area(&self, id: AreaId) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM restricted_areas WHERE id = ?1", params![id.0])?;
        Ok(changed > 0)
    }

    fn insert_violation(&self, mut violation: GeofenceViolation) -> Result<GeofenceViolation> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO geofence_violations (user_id, trip_id, detected_at, resolved, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                violation.user_id.0,
                violation.trip_id.map(|t| t.0),
                violation.detected_at,
                violation.is_resolved(),
                encode(&violation)?
            ],
        )?;
        violation.id = ViolationId(conn.last_insert_rowid());
        Ok(violation)
    }

    fn get_violation(&self, id: ViolationId) -> Result<Option<GeofenceViolation>> {
        violation_by_id(&*self.conn()?, id)
    }

    fn resolve_violation(
        &self,
        id: ViolationId,
        resolved_by: UserId,
        resolved_at: i64,
        notes: Option<String>,
    ) -> Result<GeofenceViolation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut violation = violation_by_id(&tx, id)?.or_not_found("violation", id.0)?;
        if violation.is_resolved() {
            return Err(TrackingError::ViolationAlreadyResolved {
                violation_id: id.0,
            });
        }
        violation.resolved_at = Some(resolved_at);
        violation.resolved_by = Some(resolved_by);
        if notes.is_some() {
            violation.notes = notes;
        }
        tx.execute(
            "UPDATE geofence_violations SET resolved = 1, data = ?1 WHERE id = ?2",
            params![encode(&violation)?, id.0],
        )?;

        tx.commit()?;
        Ok(violation)
    }

    fn violations_for_user(&self, user_id: UserId) -> Result<Vec<GeofenceViolation>> {
        self.violations_where("user_id = ?1", Some(user_id.0))
    }

    fn violations_for_trip(&self, trip_id: TripId) -> Result<Vec<GeofenceViolation>> {
        self.violations_where("trip_id = ?1", Some(trip_id.0))
    }

    fn unresolved_violations(&self) -> Result<Vec<GeofenceViolation>> {
        self.violations_where("resolved = 0", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AreaType, DayPlan, LocationSource, SegmentStats, TripStatus, ViolationType,
    };
    use crate::{GpsPoint, NamedLocation};

    fn trip(store: &SqliteStore) -> Trip {
        let plan = DayPlan::tour(
            NamedLocation::new("Hotel", GpsPoint::new(27.7, 85.3)),
            NamedLocation::new("Stupa", GpsPoint::new(27.72, 85.36)),
        );
        store
            .insert_trip(Trip::from_plan(UserId(5), &plan, 100))
            .unwrap()
    }

    fn sample(trip_id: TripId, ts: i64, waypoint: bool) -> LocationSample {
        LocationSample {
            seq: 0,
            trip_id,
            user_id: UserId(5),
            timestamp: ts,
            location: GpsPoint::new(27.7, 85.3),
            altitude: Some(1_400.0),
            accuracy: Some(5.0),
            speed: None,
            bearing: None,
            source: LocationSource::MobileGps,
            trip_phase: None,
            device_id: None,
            battery_level: None,
            signal_strength: None,
            is_waypoint: waypoint,
            notes: None,
        }
    }

    fn count_rows(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn close_at(ts: i64) -> SegmentClose {
        SegmentClose {
            end_timestamp: ts,
            end_location: GpsPoint::new(27.72, 85.36),
            stats: SegmentStats::default(),
        }
    }

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_trip_round_trip_and_update() {
        let store = SqliteStore::in_memory().unwrap();
        let mut stored = trip(&store);
        assert_eq!(stored.id, TripId(1));
        assert_eq!(store.get_trip(stored.id).unwrap().as_ref(), Some(&stored));
        assert!(store.active_trips().unwrap().is_empty());

        stored.status = TripStatus::Started;
        stored.tracking_active = true;
        store.update_trip(&stored).unwrap();
        assert_eq!(store.active_trips().unwrap(), vec![stored.clone()]);

        let mut ghost = stored.clone();
        ghost.id = TripId(99);
        assert!(matches!(
            store.update_trip(&ghost),
            Err(TrackingError::NotFound { entity: "trip", .. })
        ));
    }

    #[test]
    fn test_samples_and_last_known() {
        let store = SqliteStore::in_memory().unwrap();
        let t = trip(&store);
        store.append_sample(sample(t.id, 200, false)).unwrap();
        store.append_sample(sample(t.id, 100, true)).unwrap();
        let third = store.append_sample(sample(t.id, 300, false)).unwrap();
        assert_eq!(third.seq, 3);

        let all = store.samples_for_trip(t.id, None, None).unwrap();
        let order: Vec<i64> = all.iter().map(|s| s.timestamp).collect();
        assert_eq!(order, vec![200, 100, 300]);

        let window = store.samples_for_trip(t.id, Some(150), Some(250)).unwrap();
        assert_eq!(window.len(), 1);

        assert_eq!(
            store.sample_counts(t.id).unwrap(),
            SampleCounts {
                total: 3,
                waypoints: 1
            }
        );

        let last = store.last_known(t.id).unwrap().unwrap();
        assert_eq!(last.timestamp, 300);
        assert_eq!(last.last_waypoint_at, Some(100));

        let many = store.last_known_many(&[t.id, TripId(42)]).unwrap();
        assert_eq!(many.len(), 1);
        assert!(store.last_known_many(&[]).unwrap().is_empty());
        assert_eq!(count_rows(&store, "location_samples"), 3);
    }

    #[test]
    fn test_transition_rolls_back_on_failure() {
        let store = SqliteStore::in_memory().unwrap();
        let mut t = trip(&store);
        let open = store
            .insert_segment(RouteSegment::open(t.id, "outbound", t.hotel.location, 100, None))
            .unwrap();

        // Closing before the start fails after nothing else was written
        t.status = TripStatus::Visiting;
        let bad = TripTransition {
            trip: t.clone(),
            close: Some((open.id, close_at(50))),
            open: None,
        };
        assert!(store.commit_transition(bad).is_err());
        assert_eq!(store.get_trip(t.id).unwrap().unwrap().status, TripStatus::Assigned);
        assert!(!store.get_segment(open.id).unwrap().unwrap().is_completed);

        let good = TripTransition {
            trip: t.clone(),
            close: Some((open.id, close_at(200))),
            open: Some(RouteSegment::open(t.id, "return", t.hotel.location, 200, None)),
        };
        let opened = store.commit_transition(good).unwrap().unwrap();
        assert_eq!(store.get_trip(t.id).unwrap().unwrap().status, TripStatus::Visiting);
        assert!(store.get_segment(open.id).unwrap().unwrap().is_completed);
        assert_eq!(store.open_segment(t.id).unwrap().unwrap().id, opened);

        let segments = store.segments_for_trip(t.id).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(matches!(
            store.complete_segment(open.id, &close_at(300)),
            Err(TrackingError::SegmentAlreadyCompleted { .. })
        ));
    }

    #[test]
    fn test_second_open_segment_is_refused() {
        let store = SqliteStore::in_memory().unwrap();
        let t = trip(&store);
        store
            .insert_segment(RouteSegment::open(t.id, "outbound", t.hotel.location, 100, None))
            .unwrap();
        assert!(matches!(
            store.insert_segment(RouteSegment::open(t.id, "trek", t.hotel.location, 110, None)),
            Err(TrackingError::SegmentAlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_areas_and_violations() {
        let store = SqliteStore::in_memory().unwrap();
        let ring = [
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.0, 0.01),
            GpsPoint::new(0.01, 0.01),
            GpsPoint::new(0.01, 0.0),
        ];
        let mut area = store
            .save_area(RestrictedArea::new("Reserve", AreaType::ProtectedArea, &ring).unwrap())
            .unwrap();
        area.severity_level = 3;
        store.save_area(area.clone()).unwrap();
        assert_eq!(store.get_area(area.id).unwrap().unwrap().severity_level, 3);
        assert_eq!(store.list_areas().unwrap().len(), 1);

        let make = |ts: i64| GeofenceViolation {
            id: ViolationId::default(),
            user_id: UserId(5),
            area_id: area.id,
            trip_id: Some(TripId(1)),
            violation_type: ViolationType::Entry,
            location: GpsPoint::new(0.005, 0.005),
            detected_at: ts,
            resolved_at: None,
            resolved_by: None,
            notes: None,
            notification_sent: false,
            authorities_alerted: false,
            severity_score: 3,
        };
        let older = store.insert_violation(make(10)).unwrap();
        let newer = store.insert_violation(make(20)).unwrap();

        let listed = store.violations_for_user(UserId(5)).unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(store.violations_for_trip(TripId(1)).unwrap().len(), 2);

        let resolved = store
            .resolve_violation(older.id, UserId(1), 30, Some("escorted out".into()))
            .unwrap();
        assert_eq!(resolved.resolved_at, Some(30));
        assert!(matches!(
            store.resolve_violation(older.id, UserId(1), 40, None),
            Err(TrackingError::ViolationAlreadyResolved { .. })
        ));
        let open: Vec<ViolationId> = store
            .unresolved_violations()
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(open, vec![newer.id]);

        assert!(store.delete_area(area.id).unwrap());
        assert!(!store.delete_area(area.id).unwrap());
    }
}
