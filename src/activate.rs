//! Activation scripts for relocated environments
//!
//! When rewrites are deferred, the archive carries its own `activate` and
//! `deactivate` scripts. They locate the environment from their own path, so
//! they work wherever the archive is extracted, without a package manager.

use crate::file::File;
use crate::BIN_DIR;

/// Permission bits of generated scripts
pub const SCRIPT_MODE: u32 = 0o755;

#[cfg(not(windows))]
const ACTIVATE: &str = r#"# Activate this environment with `. bin/activate` (bash or zsh)
if [ -n "${BASH_VERSION:-}" ]; then
    _envpack_source="${BASH_SOURCE[0]}"
elif [ -n "${ZSH_VERSION:-}" ]; then
    _envpack_source="${(%):-%x}"
else
    echo "activate must be sourced from bash or zsh" >&2
    return 1
fi
_envpack_bin="$(cd "$(dirname "$_envpack_source")" && pwd)"

if [ -n "${ENVPACK_ACTIVE_PREFIX:-}" ]; then
    . "$ENVPACK_ACTIVE_PREFIX/bin/deactivate"
fi

ENVPACK_ACTIVE_PREFIX="$(dirname "$_envpack_bin")"
CONDA_PREFIX="$ENVPACK_ACTIVE_PREFIX"
_ENVPACK_OLD_PATH="$PATH"
PATH="$_envpack_bin:$PATH"
export ENVPACK_ACTIVE_PREFIX CONDA_PREFIX PATH
_ENVPACK_OLD_PS1="${PS1:-}"
PS1="($(basename "$ENVPACK_ACTIVE_PREFIX")) ${PS1:-}"

if [ -d "$ENVPACK_ACTIVE_PREFIX/etc/conda/activate.d" ]; then
    for _envpack_hook in "$ENVPACK_ACTIVE_PREFIX"/etc/conda/activate.d/*.sh; do
        [ -f "$_envpack_hook" ] && . "$_envpack_hook"
    done
fi

unset _envpack_source _envpack_bin _envpack_hook
hash -r 2>/dev/null
"#;

#[cfg(not(windows))]
const DEACTIVATE: &str = r#"# Deactivate an environment activated with `. bin/activate`
if [ -n "${ENVPACK_ACTIVE_PREFIX:-}" ]; then
    if [ -d "$ENVPACK_ACTIVE_PREFIX/etc/conda/deactivate.d" ]; then
        for _envpack_hook in "$ENVPACK_ACTIVE_PREFIX"/etc/conda/deactivate.d/*.sh; do
            [ -f "$_envpack_hook" ] && . "$_envpack_hook"
        done
    fi

    PATH="$_ENVPACK_OLD_PATH"
    export PATH
    PS1="$_ENVPACK_OLD_PS1"
    unset ENVPACK_ACTIVE_PREFIX CONDA_PREFIX _ENVPACK_OLD_PATH _ENVPACK_OLD_PS1 _envpack_hook
    hash -r 2>/dev/null
fi
"#;

#[cfg(not(windows))]
const SCRIPTS: &[(&str, &str)] = &[("activate", ACTIVATE), ("deactivate", DEACTIVATE)];

#[cfg(windows)]
const ACTIVATE: &str = "@REM Activate this environment with: call Scripts\\activate.bat\r
@if defined ENVPACK_ACTIVE_PREFIX @call \"%ENVPACK_ACTIVE_PREFIX%\\Scripts\\deactivate.bat\"\r
@for %%i in (\"%~dp0..\") do @set \"ENVPACK_ACTIVE_PREFIX=%%~fi\"\r
@set \"CONDA_PREFIX=%ENVPACK_ACTIVE_PREFIX%\"\r
@set \"_ENVPACK_OLD_PATH=%PATH%\"\r
@set \"_ENVPACK_OLD_PROMPT=%PROMPT%\"\r
@set \"PATH=%ENVPACK_ACTIVE_PREFIX%;%ENVPACK_ACTIVE_PREFIX%\\Library\\bin;%ENVPACK_ACTIVE_PREFIX%\\Scripts;%PATH%\"\r
@for %%i in (\"%ENVPACK_ACTIVE_PREFIX%\") do @set \"PROMPT=(%%~ni) %PROMPT%\"\r
@if exist \"%ENVPACK_ACTIVE_PREFIX%\\etc\\conda\\activate.d\" @for %%f in (\"%ENVPACK_ACTIVE_PREFIX%\\etc\\conda\\activate.d\\*.bat\") do @call \"%%f\"\r
";

#[cfg(windows)]
const DEACTIVATE: &str = "@REM Deactivate an environment activated with Scripts\\activate.bat\r
@if not defined ENVPACK_ACTIVE_PREFIX @exit /b 0\r
@if exist \"%ENVPACK_ACTIVE_PREFIX%\\etc\\conda\\deactivate.d\" @for %%f in (\"%ENVPACK_ACTIVE_PREFIX%\\etc\\conda\\deactivate.d\\*.bat\") do @call \"%%f\"\r
@set \"PATH=%_ENVPACK_OLD_PATH%\"\r
@set \"PROMPT=%_ENVPACK_OLD_PROMPT%\"\r
@set ENVPACK_ACTIVE_PREFIX=\r
@set CONDA_PREFIX=\r
@set _ENVPACK_OLD_PATH=\r
@set _ENVPACK_OLD_PROMPT=\r
";

#[cfg(windows)]
const SCRIPTS: &[(&str, &str)] = &[("activate.bat", ACTIVATE), ("deactivate.bat", DEACTIVATE)];

/// Archive paths of the generated scripts
pub fn activation_targets() -> impl Iterator<Item = String> {
    SCRIPTS.iter().map(|(name, _)| format!("{}/{}", BIN_DIR, name))
}

/// Generated `activate` / `deactivate` entries
pub fn activation_scripts() -> Vec<File> {
    activation_targets()
        .zip(SCRIPTS)
        .map(|(target, (_, body))| File::inline(target, body.as_bytes().to_vec(), SCRIPT_MODE))
        .collect()
}
