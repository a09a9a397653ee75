// libs/integration-cell/src/services/normalize.rs
//
// Turns the payload shapes 1C sends into the internal representation. Nothing
// here touches storage.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Map, Value};

use crate::models::{
    BookingWebhook, BranchSlots, Cell, CellsBatch, InboundBookingEvent, IngestionError,
    LifecycleEvent, LifecycleKind, ScheduleBatch,
};

/// Reads a string or numeric id.
fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_id(object: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| id_field(object.get(*key)))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%d.%m.%Y"))
        .ok()
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

/// Full timestamps pass through; bare clock times are pinned to `date` as a
/// naive local time for the slot parser to place in the clinic's offset.
pub fn combine_time(date: NaiveDate, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return Some(raw.to_string());
    }
    if let Some(time) = parse_clock(raw) {
        return Some(NaiveDateTime::new(date, time).format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.format("%Y-%m-%dT%H:%M:%S").to_string())
}

// ==============================================================================
// BOOKING WEBHOOKS
// ==============================================================================

/// Branch external id from the top level, the nested slot, or the legacy
/// `filial_id` alias.
pub fn branch_external_id(payload: &Value) -> Option<String> {
    id_field(payload.get("branch_id"))
        .or_else(|| payload.get("slot").and_then(|slot| id_field(slot.get("branch_id"))))
        .or_else(|| id_field(payload.get("filial_id")))
}

pub fn normalize_booking_payload(payload: &Value) -> Result<BookingWebhook, IngestionError> {
    if !payload.is_object() {
        return Err(IngestionError::Malformed("webhook body must be an object".to_string()));
    }

    let branch_external_id = branch_external_id(payload)
        .ok_or_else(|| IngestionError::NotFound("Webhook does not name a branch".to_string()))?;

    let event = if is_cells_batch(payload) {
        InboundBookingEvent::Cells(cells_batch(payload)?)
    } else {
        InboundBookingEvent::Lifecycle(lifecycle_event(payload)?)
    };

    Ok(BookingWebhook {
        branch_external_id,
        event,
    })
}

fn is_cells_batch(payload: &Value) -> bool {
    payload.get("cells").map(Value::is_array).unwrap_or(false)
        && payload.get("doctor_id").is_some()
        && payload.get("date").is_some()
}

fn cells_batch(payload: &Value) -> Result<CellsBatch, IngestionError> {
    let doctor_id = id_field(payload.get("doctor_id"))
        .ok_or_else(|| IngestionError::Malformed("cells batch without doctor_id".to_string()))?;
    let date = payload
        .get("date")
        .and_then(Value::as_str)
        .and_then(parse_date)
        .ok_or_else(|| IngestionError::Malformed("cells batch with unreadable date".to_string()))?;

    let cells = payload
        .get("cells")
        .and_then(Value::as_array)
        .map(|cells| cells.iter().map(cell).collect())
        .unwrap_or_default();

    Ok(CellsBatch {
        doctor_id,
        date,
        cells,
    })
}

fn cell(raw: &Value) -> Cell {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);

    Cell {
        slot_id: first_id(raw, &["slot_id", "id"]),
        time_start: text("time_start").unwrap_or_default(),
        time_end: text("time_end").unwrap_or_default(),
        free: raw.get("free").and_then(Value::as_bool),
        status: text("status"),
        claim_id: first_id(raw, &["claim_id", "appointment_id", "booking_uuid"]),
        cabinet_id: first_id(raw, &["cabinet_id"]),
        raw: raw.clone(),
    }
}

/// Raw slot record for one cell of the batch.
pub fn cell_slot_record(batch: &CellsBatch, cell: &Cell) -> Value {
    let mut record = Map::new();
    record.insert("slot_id".into(), json!(cell.slot_id));
    record.insert("start".into(), json!(combine_time(batch.date, &cell.time_start)));
    record.insert("end".into(), json!(combine_time(batch.date, &cell.time_end)));
    match (&cell.status, cell.free) {
        (Some(status), _) => {
            record.insert("status".into(), json!(status));
        }
        (None, Some(free)) => {
            record.insert("free".into(), json!(free));
        }
        (None, None) => {}
    }
    record.insert("doctor_id".into(), json!(batch.doctor_id));
    record.insert("cabinet_id".into(), json!(cell.cabinet_id));
    record.insert("booking_uuid".into(), json!(cell.claim_id));
    record.insert("cell".into(), cell.raw.clone());
    Value::Object(record)
}

fn lifecycle_event(payload: &Value) -> Result<LifecycleEvent, IngestionError> {
    let kind: LifecycleKind = payload
        .get("event")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|_| IngestionError::Malformed("unknown booking event".to_string()))?
        .ok_or_else(|| IngestionError::Malformed("payload is neither a cells batch nor a booking event".to_string()))?;

    let mut slot = payload
        .get("slot")
        .filter(|slot| slot.is_object())
        .cloned()
        .ok_or_else(|| IngestionError::Malformed("booking event without slot".to_string()))?;

    let booking_id = payload
        .get("booking")
        .and_then(|booking| id_field(booking.get("id")))
        .or_else(|| first_id(&slot, &["booking_uuid", "claim_id", "appointment_id"]));

    if let Value::Object(fields) = &mut slot {
        match kind {
            LifecycleKind::Cancelled => {
                fields.insert("status".into(), json!("free"));
                fields.remove("free");
                fields.remove("booking_uuid");
                fields.remove("claim_id");
            }
            LifecycleKind::Created | LifecycleKind::Updated => {
                if let Some(id) = &booking_id {
                    fields.remove("claim_id");
                    fields.insert("booking_uuid".into(), json!(id));
                }
            }
        }
    }

    Ok(LifecycleEvent {
        kind,
        slot,
        booking_id,
    })
}

// ==============================================================================
// SCHEDULE PUSHES
// ==============================================================================

pub fn normalize_schedule_payload(payload: &Value) -> Result<ScheduleBatch, IngestionError> {
    if let Some(branches) = payload.get("branches").and_then(Value::as_array) {
        let branches = branches
            .iter()
            .map(|branch| {
                let branch_external_id = first_id(branch, &["branch_id", "filial_id"]).ok_or_else(|| {
                    IngestionError::Malformed("schedule entry without branch_id".to_string())
                })?;
                let slots = branch
                    .get("slots")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok(BranchSlots {
                    branch_external_id,
                    slots,
                })
            })
            .collect::<Result<Vec<_>, IngestionError>>()?;

        return Ok(ScheduleBatch {
            legacy: false,
            branches,
        });
    }

    if let Some(filials) = payload.get("Filials").and_then(Value::as_array) {
        return Ok(ScheduleBatch {
            legacy: true,
            branches: filials.iter().map(legacy_filial).collect::<Result<_, _>>()?,
        });
    }

    Err(IngestionError::Malformed(
        "expected a 'branches' list or a legacy 'Filials' list".to_string(),
    ))
}

fn legacy_filial(filial: &Value) -> Result<BranchSlots, IngestionError> {
    let branch_external_id = first_id(filial, &["FilialId"])
        .ok_or_else(|| IngestionError::Malformed("Filial without FilialId".to_string()))?;

    let mut slots = Vec::new();
    for employee in filial.get("Employees").and_then(Value::as_array).into_iter().flatten() {
        let employee_id = first_id(employee, &["EmployeeId"]);
        let cabinet_id = first_id(employee, &["CabinetId"]);

        for cell in employee.get("Cells").and_then(Value::as_array).into_iter().flatten() {
            slots.push(legacy_cell(cell, employee_id.as_deref(), cabinet_id.as_deref())?);
        }
    }

    Ok(BranchSlots {
        branch_external_id,
        slots,
    })
}

fn legacy_cell(cell: &Value, employee_id: Option<&str>, cabinet_id: Option<&str>) -> Result<Value, IngestionError> {
    let text = |key: &str| cell.get(key).and_then(Value::as_str);

    let date = text("Date")
        .and_then(parse_date)
        .ok_or_else(|| IngestionError::Malformed("legacy cell with unreadable Date".to_string()))?;
    let start = text("TimeBegin")
        .and_then(|raw| combine_time(date, raw))
        .ok_or_else(|| IngestionError::Malformed("legacy cell with unreadable TimeBegin".to_string()))?;
    let end = text("TimeEnd")
        .and_then(|raw| combine_time(date, raw))
        .ok_or_else(|| IngestionError::Malformed("legacy cell with unreadable TimeEnd".to_string()))?;

    let mut record = Map::new();
    record.insert("slot_id".into(), json!(first_id(cell, &["Id"])));
    record.insert("start".into(), json!(start));
    record.insert("end".into(), json!(end));
    if let Some(status) = text("Status") {
        record.insert("status".into(), json!(status));
    } else if let Some(free) = cell.get("Free").and_then(Value::as_bool) {
        record.insert("free".into(), json!(free));
    }
    record.insert("doctor_id".into(), json!(employee_id));
    record.insert("cabinet_id".into(), json!(cabinet_id));
    record.insert("booking_uuid".into(), json!(first_id(cell, &["AppointmentId"])));
    Ok(Value::Object(record))
}
