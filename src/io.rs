use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::config::CalibrationConfig;
use crate::correspondence::{CameraCorrespondences, CameraId};
use crate::intrinsics::{CameraInfo, Intrinsics};
use crate::session::{CalibrationError, CalibrationSession, CameraEntry, CameraSolution};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize, P: AsRef<Path>>(output_path: P, object: &T) -> Result<(), IoError> {
    let path = output_path.as_ref();
    let j = serde_json::to_string_pretty(object).map_err(|source| IoError::Json {
        path: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, j).map_err(|source| IoError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned, P: AsRef<Path>>(file_path: P) -> Result<T, IoError> {
    let path = file_path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| IoError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| IoError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Reads an uploaded camera info file (`camera_matrix`, `distortion_coefficients`, ...).
pub fn load_camera_info<P: AsRef<Path>>(file_path: P) -> Result<CameraInfo, IoError> {
    let info: CameraInfo = object_from_json(&file_path)?;
    info.camera_matrix().map_err(CalibrationError::from)?;
    info.distortion().map_err(CalibrationError::from)?;
    Ok(info)
}

/// One camera of a stored session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCamera {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<Intrinsics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub pairs: CameraCorrespondences,
}

/// Cameras with their intrinsics and point pairs, as saved between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFile {
    pub cameras: BTreeMap<CameraId, SessionCamera>,
}

impl SessionFile {
    pub fn into_session(self, config: CalibrationConfig) -> CalibrationSession {
        let mut session = CalibrationSession::new(config);
        for (camera_id, camera) in self.cameras {
            let image_size = camera.image_width.zip(camera.image_height);
            let entry = CameraEntry {
                label: camera.label,
                intrinsics: camera.intrinsics,
                image_size,
            };
            session.insert_camera(&camera_id, entry, camera.pairs);
        }
        session
    }

    pub fn from_session(session: &CalibrationSession) -> SessionFile {
        let cameras = session
            .camera_ids()
            .filter_map(|camera_id| {
                let entry = session.camera(camera_id)?;
                let pairs = session.pairs_for(camera_id).ok()?.clone();
                Some((
                    camera_id.clone(),
                    SessionCamera {
                        label: entry.label.clone(),
                        intrinsics: entry.intrinsics.clone(),
                        image_width: entry.image_size.map(|(w, _)| w),
                        image_height: entry.image_size.map(|(_, h)| h),
                        pairs,
                    },
                ))
            })
            .collect();
        SessionFile { cameras }
    }
}

pub fn load_session<P: AsRef<Path>>(
    file_path: P,
    config: CalibrationConfig,
) -> Result<CalibrationSession, IoError> {
    let file: SessionFile = object_from_json(file_path)?;
    Ok(file.into_session(config))
}

pub fn save_session<P: AsRef<Path>>(output_path: P, session: &CalibrationSession) -> Result<(), IoError> {
    object_to_json(output_path, &SessionFile::from_session(session))
}

/// Writes `{camera_id: {label, pose}}`.
pub fn write_solutions<P: AsRef<Path>>(
    output_path: P,
    solutions: &BTreeMap<CameraId, CameraSolution>,
) -> Result<(), IoError> {
    object_to_json(output_path, solutions)
}
