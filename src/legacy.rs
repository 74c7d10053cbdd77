use serde::Deserialize;
use std::path::Path;

// Parser for exports of the browser edition's local storage: one JSON
// object mapping storage keys to JSON arrays. Key conventions carried over
// from the portal:
//   students, faculty, users, study_materials, faculty_messages,
//   student_leaves_pending, student_leaves_history, hod_faculty_leaves,
//   certificates_<studentKey>, admin_timetables
// Anything else is passed through untouched for the collections store.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyStudent {
    #[serde(alias = "hallticket", alias = "hallTicketNo")]
    pub hall_ticket: String,
    pub name: String,
    pub year: String,
    pub section: String,
    pub branch: String,
    pub cgpa: Option<f64>,
    pub attendance: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyFaculty {
    pub name: String,
    pub department: String,
    pub designation: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyLeave {
    #[serde(alias = "studentId", alias = "facultyId")]
    pub applicant_id: String,
    #[serde(alias = "type")]
    pub leave_type: String,
    pub from_date: String,
    pub to_date: String,
    pub reason: String,
    pub status: String,
    pub approved_by: Option<String>,
    pub approved_date: Option<String>,
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyCertificate {
    pub title: String,
    #[serde(alias = "issuer")]
    pub organization: String,
    #[serde(alias = "issueDate")]
    pub issued_on: String,
    #[serde(alias = "expiryDate")]
    pub expires_on: Option<String>,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyMaterial {
    pub uploader_id: String,
    pub title: String,
    pub subject: String,
    pub year: String,
    pub semester: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub downloads: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyMessage {
    pub sender_id: String,
    pub sender_role: String,
    pub recipient_id: String,
    pub recipient_role: String,
    pub subject: String,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(alias = "date")]
    pub sent_on: Option<String>,
    pub read: bool,
}

#[derive(Debug, Default)]
pub struct StorageDump {
    pub students: Vec<LegacyStudent>,
    pub faculty: Vec<LegacyFaculty>,
    pub student_leaves: Vec<LegacyLeave>,
    pub faculty_leaves: Vec<LegacyLeave>,
    pub certificates: Vec<(String, Vec<LegacyCertificate>)>,
    pub materials: Vec<LegacyMaterial>,
    pub messages: Vec<LegacyMessage>,
    /// Unrecognized keys, kept verbatim for the collections store.
    pub passthrough: Vec<(String, Vec<serde_json::Value>)>,
    /// Keys whose payload was not a JSON array of objects. The browser
    /// edition treated those as empty collections; we report them instead.
    pub malformed_keys: Vec<String>,
}

pub fn parse_storage_dump_file(path: &Path) -> anyhow::Result<StorageDump> {
    let text = std::fs::read_to_string(path)?;
    parse_storage_dump(&text)
}

pub fn parse_storage_dump(text: &str) -> anyhow::Result<StorageDump> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let Some(map) = root.as_object() else {
        anyhow::bail!("storage dump must be a JSON object keyed by storage key");
    };

    let mut dump = StorageDump::default();

    for (key, value) in map {
        let Some(items) = as_object_array(value) else {
            dump.malformed_keys.push(key.clone());
            continue;
        };

        match key.as_str() {
            "students" => dump.students = lenient_vec(&items),
            "faculty" | "users" => dump.faculty.extend(lenient_vec::<LegacyFaculty>(&items)),
            "student_leaves_pending" | "student_leaves_history" => {
                dump.student_leaves.extend(lenient_vec::<LegacyLeave>(&items))
            }
            "hod_faculty_leaves" => {
                dump.faculty_leaves.extend(lenient_vec::<LegacyLeave>(&items))
            }
            "study_materials" => dump.materials = lenient_vec(&items),
            "faculty_messages" => dump.messages = lenient_vec(&items),
            _ => {
                if let Some(student_key) = key.strip_prefix("certificates_") {
                    dump.certificates
                        .push((student_key.to_string(), lenient_vec(&items)));
                } else {
                    dump.passthrough.push((key.clone(), items));
                }
            }
        }
    }

    Ok(dump)
}

fn as_object_array(value: &serde_json::Value) -> Option<Vec<serde_json::Value>> {
    let items = value.as_array()?;
    if items.iter().all(|v| v.is_object()) {
        Some(items.clone())
    } else {
        None
    }
}

// Per-item leniency: an entry that fails to deserialize is dropped, the
// rest of the key still imports.
fn lenient_vec<T: serde::de::DeserializeOwned>(items: &[serde_json::Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}
