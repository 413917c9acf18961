use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

use super::{Code, Message};

/// Parameter naming the file carried by an upload or requested by a download.
pub const NAME_PARAM: &str = "name";

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("code {0} does not describe a request")]
    NotARequest(Code),
    #[error("{0} request is missing the 'name' parameter")]
    MissingName(Code),
    #[error("invalid file name '{0}'")]
    InvalidName(String),
    #[error("file IO error: {0}")]
    Io(#[from] io::Error),
}

/// What a request asks the agent to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Report system information.
    GetInfo,
    /// Report the working directory.
    WorkingDirectory,
    /// Run an opaque command string.
    Command(String),
    /// Store `data` under `name` on the agent.
    Upload { name: String, data: Vec<u8> },
    /// Send back the file called `name`.
    Download { name: String },
}

impl Intent {
    /// Builds an upload of the file at `path`, named by its final component.
    pub fn upload_file(path: impl AsRef<Path>) -> Result<Self, IntentError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IntentError::InvalidName(path.display().to_string()))?
            .to_string();
        let data = fs::read(path)?;

        Ok(Intent::Upload { name, data })
    }
}

impl From<Intent> for Message {
    fn from(value: Intent) -> Self {
        match value {
            Intent::GetInfo => Message::new(Code::GET_INFO),
            Intent::WorkingDirectory => Message::new(Code::PWD),
            Intent::Command(cmd) => Message::new(Code::CMD).with_content(cmd),
            Intent::Upload { name, data } => Message::new(Code::UPLOAD)
                .with_content(data)
                .with_param(NAME_PARAM, name),
            Intent::Download { name } => Message::new(Code::DOWNLOAD).with_param(NAME_PARAM, name),
        }
    }
}

impl TryFrom<Message> for Intent {
    type Error = IntentError;

    fn try_from(value: Message) -> Result<Self, Self::Error> {
        let name = |msg: &Message| {
            msg.params
                .first(NAME_PARAM)
                .map(str::to_string)
                .ok_or(IntentError::MissingName(msg.code))
        };

        match value.code {
            Code::GET_INFO => Ok(Intent::GetInfo),
            Code::PWD => Ok(Intent::WorkingDirectory),
            Code::CMD => Ok(Intent::Command(
                value.text().map(|t| t.into_owned()).unwrap_or_default(),
            )),
            Code::UPLOAD => Ok(Intent::Upload {
                name: name(&value)?,
                data: value.content.unwrap_or_default(),
            }),
            Code::DOWNLOAD => Ok(Intent::Download {
                name: name(&value)?,
            }),
            code => Err(IntentError::NotARequest(code)),
        }
    }
}

/// Writes the content of a download response into `dir`.
///
/// The file is named after the response's `name` parameter, falling back to
/// `fallback` (usually the name that was requested). Only the final path
/// component of the name is used.
pub fn save_download(
    response: &Message,
    dir: impl AsRef<Path>,
    fallback: &str,
) -> Result<PathBuf, IntentError> {
    let name = response.params.first(NAME_PARAM).unwrap_or(fallback);
    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| IntentError::InvalidName(name.to_string()))?;

    let path = dir.as_ref().join(file_name);
    fs::write(&path, response.content.as_deref().unwrap_or_default())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn intent_to_message() {
        let inputs = vec![
            (Intent::GetInfo, Message::new(Code::GET_INFO)),
            (Intent::WorkingDirectory, Message::new(Code::PWD)),
            (
                Intent::Command("whoami".to_string()),
                Message::new(Code::CMD).with_content("whoami"),
            ),
            (
                Intent::Download {
                    name: "a.txt".to_string(),
                },
                Message::new(Code::DOWNLOAD).with_param("name", "a.txt"),
            ),
        ];

        for (intent, expected) in inputs {
            let message: Message = intent.into();
            assert_eq!(message, expected);
        }
    }

    #[test]
    fn message_to_intent() {
        let upload = Intent::Upload {
            name: "bin".to_string(),
            data: vec![0, 1, 2],
        };
        let message: Message = upload.clone().into();

        assert_eq!(Intent::try_from(message).unwrap(), upload);
    }

    #[test]
    #[should_panic(expected = "NotARequest")]
    fn response_is_not_an_intent() {
        let _: Intent = Message::success("ok").try_into().unwrap();
    }

    #[test]
    #[should_panic(expected = "MissingName")]
    fn download_requires_name() {
        let _: Intent = Message::new(Code::DOWNLOAD).try_into().unwrap();
    }

    #[test]
    fn upload_file_reads_content() {
        let temp = TempDir::new("upload").unwrap();
        let path = temp.path().join("notes.txt");
        fs::write(&path, b"remember").unwrap();

        let intent = Intent::upload_file(&path).unwrap();
        assert_eq!(
            intent,
            Intent::Upload {
                name: "notes.txt".to_string(),
                data: b"remember".to_vec()
            }
        );
    }

    #[test]
    fn save_download_strips_directories() {
        let temp = TempDir::new("download").unwrap();
        let response =
            Message::success(vec![0xff, 0x00]).with_param("name", "../../etc/report.bin");

        let path = save_download(&response, temp.path(), "unused").unwrap();
        assert_eq!(path, temp.path().join("report.bin"));
        assert_eq!(fs::read(path).unwrap(), vec![0xff, 0x00]);
    }

    #[test]
    fn save_download_uses_fallback_name() {
        let temp = TempDir::new("download").unwrap();
        let response = Message::success("plain");

        let path = save_download(&response, temp.path(), "requested.txt").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "plain");
    }
}
