use std::{collections::BTreeMap, fmt::Debug};

/// One argv
pub type CommandLine = Vec<String>;

/// Knows how to build and run programs written in some language.
///
/// All paths are relative to the sandbox working directory.
pub trait Language: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Extension (with leading dot) replacing `.%l` in submitted codenames
    fn source_extension(&self) -> &str;

    fn executable_extension(&self) -> &str {
        ""
    }

    fn compilation_commands(&self, sources: &[String], executable: &str) -> Vec<CommandLine>;

    /// Commands running `executable`. All but the last are setup commands;
    /// the last one is the measured user process.
    fn evaluation_commands(&self, executable: &str) -> Vec<CommandLine>;
}

/// C-family language built by a gcc-like driver
#[derive(Debug)]
struct GccLanguage {
    name: &'static str,
    compiler: &'static str,
    standard: &'static str,
    source_extension: &'static str,
    libraries: &'static [&'static str],
}

impl Language for GccLanguage {
    fn name(&self) -> &str {
        self.name
    }

    fn source_extension(&self) -> &str {
        self.source_extension
    }

    fn compilation_commands(&self, sources: &[String], executable: &str) -> Vec<CommandLine> {
        let mut cmd = vec![
            self.compiler.to_string(),
            "-DEVAL".to_string(),
            format!("-std={}", self.standard),
            "-O2".to_string(),
            "-pipe".to_string(),
            "-static".to_string(),
            "-s".to_string(),
            "-o".to_string(),
            executable.to_string(),
        ];
        cmd.extend(sources.iter().cloned());
        cmd.extend(self.libraries.iter().map(|lib| lib.to_string()));
        vec![cmd]
    }

    fn evaluation_commands(&self, executable: &str) -> Vec<CommandLine> {
        vec![vec![format!("./{}", executable)]]
    }
}

fn argv(items: &[&str]) -> CommandLine {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug)]
struct CPython3;

impl Language for CPython3 {
    fn name(&self) -> &str {
        "Python 3 / CPython"
    }

    fn source_extension(&self) -> &str {
        ".py"
    }

    fn executable_extension(&self) -> &str {
        ".pyz"
    }

    // First source becomes `__main__.py` of the archive
    fn compilation_commands(&self, sources: &[String], executable: &str) -> Vec<CommandLine> {
        let mut check = argv(&["/usr/bin/python3", "-m", "py_compile"]);
        check.extend(sources.iter().cloned());
        let mut cmds = vec![check, argv(&["/bin/mkdir", "-p", "bundle"])];
        if let Some((main, rest)) = sources.split_first() {
            if !rest.is_empty() {
                let mut copy = argv(&["/bin/cp"]);
                copy.extend(rest.iter().cloned());
                copy.push("bundle/".to_string());
                cmds.push(copy);
            }
            cmds.push(argv(&["/bin/cp", main.as_str(), "bundle/__main__.py"]));
        }
        cmds.push(argv(&["/usr/bin/python3", "-m", "zipapp", "bundle", "-o", executable]));
        cmds
    }

    fn evaluation_commands(&self, executable: &str) -> Vec<CommandLine> {
        vec![vec!["/usr/bin/python3".to_string(), executable.to_string()]]
    }
}

/// Languages known to invoker, keyed by name
#[derive(Debug, Default)]
pub struct Languages {
    items: BTreeMap<String, Box<dyn Language>>,
}

impl Languages {
    pub fn empty() -> Languages {
        Languages::default()
    }

    pub fn builtin() -> Languages {
        let mut langs = Languages::empty();
        langs.register(Box::new(GccLanguage {
            name: "C11 / gcc",
            compiler: "/usr/bin/gcc",
            standard: "gnu11",
            source_extension: ".c",
            libraries: &["-lm"],
        }));
        langs.register(Box::new(GccLanguage {
            name: "C++17 / g++",
            compiler: "/usr/bin/g++",
            standard: "gnu++17",
            source_extension: ".cpp",
            libraries: &[],
        }));
        langs.register(Box::new(CPython3));
        langs
    }

    /// Adds language, replacing one with the same name
    pub fn register(&mut self, lang: Box<dyn Language>) {
        self.items.insert(lang.name().to_string(), lang);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Language> {
        self.items.get(name).map(|lang| &**lang)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }
}
