//! Async mesh loader
//!
//! Decodes the model on a background worker and hands the CPU mesh to the
//! render thread, which builds the GPU mesh exactly once. The worker is
//! always joined before the loader goes away.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use glam::Vec3;
use log::{error, info, warn};

use crate::error::MeshError;

/// Triangle mesh decoded on the CPU
#[derive(Clone, Debug)]
pub struct CpuMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl CpuMesh {
    pub fn center(&self) -> Vec3 {
        (self.bounds_min + self.bounds_max) * 0.5
    }

    /// Diagonal of the bounding box
    pub fn size(&self) -> f32 {
        (self.bounds_max - self.bounds_min).length()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Load the first model of an OBJ file, computing smooth normals if the
    /// file has none.
    pub fn load_obj(path: &Path) -> Result<Self, MeshError> {
        let (models, _materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ..Default::default()
            },
        )
        .map_err(|e| MeshError::Obj { path: path.display().to_string(), message: e.to_string() })?;

        let mesh = match models.into_iter().next() {
            Some(model) => model.mesh,
            None => return Err(MeshError::Empty(path.display().to_string())),
        };
        if mesh.indices.is_empty() {
            return Err(MeshError::Empty(path.display().to_string()));
        }

        let positions: Vec<[f32; 3]> = mesh.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect();
        let normals = if mesh.normals.len() == mesh.positions.len() {
            mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect()
        } else {
            smooth_normals(&positions, &mesh.indices)
        };

        let (bounds_min, bounds_max) = positions.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), p| (min.min(Vec3::from(*p)), max.max(Vec3::from(*p))),
        );

        Ok(Self { positions, normals, indices: mesh.indices, bounds_min, bounds_max })
    }
}

/// Area-weighted vertex normals
fn smooth_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for face in indices.chunks_exact(3) {
        let [a, b, c] = [face[0] as usize, face[1] as usize, face[2] as usize];
        let p0 = Vec3::from(positions[a]);
        let face_normal = (Vec3::from(positions[b]) - p0).cross(Vec3::from(positions[c]) - p0);
        for idx in [a, b, c] {
            normals[idx] += face_normal;
        }
    }
    normals.into_iter().map(|n| n.normalize_or(Vec3::Y).to_array()).collect()
}

/// A background decode in flight
pub struct LoadTask {
    path: PathBuf,
    receiver: Receiver<Result<CpuMesh, MeshError>>,
    worker: Option<JoinHandle<()>>,
}

impl LoadTask {
    /// Spawn the worker. `notify` runs on the worker after the result has
    /// been sent, e.g. to wake the event loop.
    pub fn start(path: PathBuf, notify: Option<Box<dyn FnOnce() + Send>>) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker_path = path.clone();

        let worker = thread::Builder::new().name("mesh-loader".to_string()).spawn(move || {
            let result = CpuMesh::load_obj(&worker_path);
            // The receiver may already be gone during teardown.
            let _ = sender.send(result);
            if let Some(notify) = notify {
                notify();
            }
        })?;

        info!("Loading mesh {} in the background", path.display());
        Ok(Self { path, receiver, worker: Some(worker) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking check for the decoded mesh.
    pub fn try_take(&mut self) -> Option<Result<CpuMesh, MeshError>> {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.join();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join();
                Some(Err(MeshError::WorkerLost))
            }
        }
    }

    /// Block until the worker has finished.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Mesh loader worker panicked");
            }
        }
    }
}

impl Drop for LoadTask {
    fn drop(&mut self) {
        self.join();
    }
}

/// One-shot slot for a mesh whose GPU form is built on the render thread.
pub struct AsyncModel<G> {
    task: Option<LoadTask>,
    mesh: Option<G>,
}

impl<G> AsyncModel<G> {
    pub fn empty() -> Self {
        Self { task: None, mesh: None }
    }

    pub fn start(path: PathBuf, notify: Option<Box<dyn FnOnce() + Send>>) -> Self {
        match LoadTask::start(path, notify) {
            Ok(task) => Self { task: Some(task), mesh: None },
            Err(e) => {
                error!("Failed to start mesh loader: {}", e);
                Self::empty()
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.task.is_some()
    }

    /// Called from the render thread. When the worker has finished, `build`
    /// turns the CPU mesh into the GPU mesh; returns true on that frame only.
    pub fn poll(&mut self, build: impl FnOnce(&CpuMesh) -> G) -> bool {
        let Some(task) = self.task.as_mut() else {
            return false;
        };
        let Some(result) = task.try_take() else {
            return false;
        };

        let path = task.path().display().to_string();
        self.task = None;
        match result {
            Ok(cpu) => {
                info!("Mesh {} loaded: {} triangles", path, cpu.triangle_count());
                self.mesh = Some(build(&cpu));
                true
            }
            Err(e) => {
                warn!("Mesh {} unavailable: {}", path, e);
                false
            }
        }
    }

    pub fn get(&self) -> Option<&G> {
        self.mesh.as_ref()
    }

    /// Join any in-flight worker and release the mesh.
    pub fn shutdown(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.join();
        }
        self.mesh = None;
    }
}

impl<G> Drop for AsyncModel<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const TETRAHEDRON: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
f 1 3 2
f 1 2 4
f 1 4 3
f 2 3 4
";

    fn write_obj(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("monet_vr_{}_{}.obj", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn wait_for<G>(model: &mut AsyncModel<G>, mut build: impl FnMut(&CpuMesh) -> G) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.is_loading() && Instant::now() < deadline {
            if model.poll(&mut build) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn loads_obj_with_computed_normals() {
        let path = write_obj("tetra", TETRAHEDRON);
        let mesh = CpuMesh::load_obj(&path).unwrap();
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.normals.len(), 4);
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.bounds_min, Vec3::ZERO);
        assert_eq!(mesh.bounds_max, Vec3::ONE);
        assert!((mesh.center() - Vec3::splat(0.5)).length() < 1e-6);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn gpu_mesh_is_built_exactly_once() {
        let path = write_obj("once", TETRAHEDRON);
        let builds = Arc::new(AtomicUsize::new(0));
        let mut model = AsyncModel::start(path.clone(), None);
        assert!(model.get().is_none());

        let counter = Arc::clone(&builds);
        assert!(wait_for(&mut model, |cpu| {
            counter.fetch_add(1, Ordering::SeqCst);
            cpu.triangle_count()
        }));
        assert_eq!(model.get(), Some(&4));

        for _ in 0..10 {
            assert!(!model.poll(|_| 0));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(model.get(), Some(&4));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn notify_runs_after_result_is_sent() {
        let path = write_obj("notify", TETRAHEDRON);
        let (tx, rx) = mpsc::channel();
        let notify: Box<dyn FnOnce() + Send> = Box::new(move || {
            let _ = tx.send(());
        });
        let mut model: AsyncModel<usize> = AsyncModel::start(path.clone(), Some(notify));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(model.poll(|cpu| cpu.positions.len()));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn failed_load_leaves_model_absent() {
        let mut model: AsyncModel<()> = AsyncModel::start(PathBuf::from("/no/such/monster.obj"), None);
        assert!(!wait_for(&mut model, |_| ()));
        assert!(!model.is_loading());
        assert!(model.get().is_none());
    }

    #[test]
    fn shutdown_before_completion_joins_worker() {
        let path = write_obj("teardown", TETRAHEDRON);
        let mut model: AsyncModel<usize> = AsyncModel::start(path.clone(), None);
        model.shutdown();
        assert!(!model.is_loading());
        assert!(model.get().is_none());
        assert!(!model.poll(|_| 1));
        std::fs::remove_file(path).ok();
    }
}
