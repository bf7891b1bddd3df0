use crate::model_service::ModelError;
use std::{fs, io, path::Path};

/// Downloads `url` to `destination` through a sibling `.part` file so an
/// interrupted transfer never leaves a truncated model behind.
pub fn download_model(url: &str, destination: &Path) -> Result<(), ModelError> {
    tracing::info!("Downloading model from {} to {:?}", url, destination);

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| ModelError::Download(e.to_string()))?;
    }

    let response = ureq::get(url)
        .call()
        .map_err(|e| ModelError::Download(e.to_string()))?;

    let partial = destination.with_extension("part");
    let result = (|| -> io::Result<u64> {
        let mut file = fs::File::create(&partial)?;
        let written = io::copy(&mut response.into_reader(), &mut file)?;
        file.sync_all()?;
        fs::rename(&partial, destination)?;
        Ok(written)
    })();

    match result {
        Ok(written) => {
            tracing::info!("Model downloaded ({} bytes)", written);
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(ModelError::Download(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    /// Serves one request with `head` followed by `body`, then closes.
    fn serve_once(head: String, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{}/best.onnx", addr)
    }

    fn ok_head(content_length: usize) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_length
        )
    }

    #[test]
    fn test_download_writes_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("models/best.onnx");
        let weights = b"onnx weights".to_vec();
        let url = serve_once(ok_head(weights.len()), weights.clone());

        download_model(&url, &destination).unwrap();

        assert_eq!(fs::read(&destination).unwrap(), weights);
        assert!(!destination.with_extension("part").exists());
    }

    #[test]
    fn test_http_error_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("best.onnx");
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
            Vec::new(),
        );

        let err = download_model(&url, &destination).unwrap_err();

        assert!(matches!(err, ModelError::Download(_)));
        assert!(!destination.exists());
        assert!(!destination.with_extension("part").exists());
    }

    #[test]
    fn test_truncated_transfer_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("best.onnx");
        let url = serve_once(ok_head(1024), b"only a few bytes".to_vec());

        let err = download_model(&url, &destination).unwrap_err();

        assert!(matches!(err, ModelError::Download(_)));
        assert!(!destination.exists());
        assert!(!destination.with_extension("part").exists());
    }
}
