// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Subprocess `ActionProducer` reference implementation (spec §6 "subprocess
//! invocation of registry CLIs" is an external collaborator; this is the
//! default so the binary is runnable end to end). Shells out to a `crane`-
//! compatible registry CLI: `crane copy`, `crane tag`, `crane delete`.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use promoter_core::error::PromoterError;
use promoter_core::producer::{ActionProducer, Producer, PromotionRequest, RequestOp};

/// Builds one [`SubprocessProducer`] per request, invoking `binary` (an
/// external registry CLI on `PATH` by default).
pub struct SubprocessActionProducer {
    pub binary: PathBuf,
}

impl Default for SubprocessActionProducer {
    fn default() -> Self {
        Self { binary: PathBuf::from("crane") }
    }
}

impl ActionProducer for SubprocessActionProducer {
    fn build(&self, request: &PromotionRequest) -> Box<dyn Producer> {
        Box::new(SubprocessProducer {
            binary: self.binary.clone(),
            request: request.clone(),
            child: None,
        })
    }
}

fn src_ref(request: &PromotionRequest) -> String {
    format!("{}/{}@{}", request.src_registry, request.src_image, request.digest)
}

fn dst_ref(request: &PromotionRequest, digest: Option<&promoter_core::entity::Digest>) -> String {
    match (&request.tag, digest) {
        (Some(tag), _) => format!("{}/{}:{}", request.dst_registry, request.dst_image, tag),
        (None, Some(digest)) => format!("{}/{}@{}", request.dst_registry, request.dst_image, digest),
        (None, None) => format!("{}/{}@{}", request.dst_registry, request.dst_image, request.digest),
    }
}

struct SubprocessProducer {
    binary: PathBuf,
    request: PromotionRequest,
    child: Option<Child>,
}

impl Producer for SubprocessProducer {
    fn produce(&mut self) -> Result<(Box<dyn Read + Send>, Box<dyn Read + Send>), PromoterError> {
        let mut cmd = Command::new(&self.binary);
        match &self.request.op {
            RequestOp::Add => {
                cmd.arg("copy").arg(src_ref(&self.request)).arg(dst_ref(&self.request, None));
            }
            RequestOp::Move { old_digest } => {
                // Detach the old digest's tag first, then attach the new one.
                cmd.arg("tag").arg(src_ref(&self.request)).arg(dst_ref(&self.request, Some(old_digest)));
            }
            RequestOp::Delete => {
                cmd.arg("delete").arg(dst_ref(&self.request, None));
            }
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| PromoterError::ProducerFailed {
            context: "running process".into(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| PromoterError::ProducerFailed {
            context: "running process".into(),
            reason: "child process had no stdout pipe".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| PromoterError::ProducerFailed {
            context: "running process".into(),
            reason: "child process had no stderr pipe".into(),
        })?;

        self.child = Some(child);
        Ok((Box::new(stdout), Box::new(stderr)))
    }

    fn close(&mut self) -> Result<(), PromoterError> {
        if let Some(mut child) = self.child.take() {
            let status = child.wait().map_err(|e| PromoterError::ProducerFailed {
                context: "closing process".into(),
                reason: e.to_string(),
            })?;
            if !status.success() {
                return Err(PromoterError::ProducerFailed {
                    context: "closing process".into(),
                    reason: format!("exited with {status}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promoter_core::entity::{Digest, ImageName, RegistryName};

    fn request(op: RequestOp) -> PromotionRequest {
        PromotionRequest {
            src_registry: RegistryName::new("gcr.io/foo").unwrap(),
            src_image: ImageName::new("a").unwrap(),
            dst_registry: RegistryName::new("gcr.io/bar").unwrap(),
            dst_image: ImageName::new("a").unwrap(),
            digest: Digest::parse("sha256:".to_string() + &"0".repeat(64)).unwrap(),
            tag: None,
            op,
        }
    }

    #[test]
    fn src_ref_is_fully_qualified_by_digest() {
        let r = request(RequestOp::Add);
        assert_eq!(src_ref(&r), format!("gcr.io/foo/a@sha256:{}", "0".repeat(64)));
    }

    #[test]
    fn missing_binary_surfaces_running_process_context() {
        let producer = SubprocessActionProducer {
            binary: PathBuf::from("promoter-definitely-not-a-real-binary"),
        };
        let mut prod = producer.build(&request(RequestOp::Add));
        let err = prod.produce().unwrap_err();
        assert!(err.to_string().contains("running process"));
    }
}
