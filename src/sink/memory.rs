use super::{Measurement, Point, StoreError, TimeSeriesStore};
use crate::sample::EntityId;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub bucket: String,
    pub org: String,
    pub point: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteCall {
    pub measurement: Measurement,
    pub entity_id: EntityId,
}

/// In-memory store double that records calls and can be scripted to fail.
#[derive(Default)]
pub struct MemoryStore {
    points: Mutex<Vec<StoredPoint>>,
    deletes: Mutex<Vec<DeleteCall>>,
    write_failures: Mutex<VecDeque<StoreError>>,
    write_attempts: Mutex<u32>,
}

impl MemoryStore {
    pub fn fail_next_write(&self, err: StoreError) {
        self.write_failures.lock().unwrap().push_back(err);
    }

    pub fn points(&self) -> Vec<StoredPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<DeleteCall> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn write_attempts(&self) -> u32 {
        *self.write_attempts.lock().unwrap()
    }
}

pub fn unavailable() -> StoreError {
    StoreError::Rejected {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

pub fn unauthorized() -> StoreError {
    StoreError::Rejected {
        status: 401,
        body: "unauthorized access".to_string(),
    }
}

impl TimeSeriesStore for MemoryStore {
    async fn write(&self, bucket: &str, org: &str, point: &Point) -> Result<(), StoreError> {
        *self.write_attempts.lock().unwrap() += 1;
        let failure = self.write_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        self.points.lock().unwrap().push(StoredPoint {
            bucket: bucket.to_string(),
            org: org.to_string(),
            point: point.clone(),
        });
        Ok(())
    }

    async fn delete_series(
        &self,
        _bucket: &str,
        _org: &str,
        measurement: Measurement,
        entity_id: EntityId,
    ) -> Result<(), StoreError> {
        self.deletes.lock().unwrap().push(DeleteCall {
            measurement,
            entity_id,
        });
        self.points.lock().unwrap().retain(|stored| {
            stored.point.measurement() != measurement.as_str()
                || stored.point.tags().get(super::ENTITY_TAG) != Some(&entity_id.to_string())
        });
        Ok(())
    }
}
