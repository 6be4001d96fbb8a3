use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};

/// 获取 sqload 根目录（~/.sqload）
///
/// Fallback: 如果 home_dir 失败，使用 ./.sqload
pub fn root_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".sqload"))
        .unwrap_or_else(|| PathBuf::from(".sqload"))
}

/// 获取数据源配置文件路径（~/.sqload/sources.db）
pub fn sources_db() -> PathBuf {
    root_dir().join("sources.db")
}

/// 获取任务根目录（~/.sqload/tasks）
pub fn tasks_dir() -> PathBuf {
    let dir = root_dir().join("tasks");
    let _ = create_dir_all(&dir);
    dir
}

/// 获取指定任务的目录（~/.sqload/tasks/{task_id}）
pub fn task_dir(id: &str) -> PathBuf {
    let dir = tasks_dir().join(id);
    let _ = create_dir_all(&dir);
    dir
}

/// 获取任务的游标目录（{task_dir}/cursors）
pub fn cursors_dir(task_dir: &Path) -> PathBuf {
    task_dir.join("cursors")
}
