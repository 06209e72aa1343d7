#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the argument is stored under in `Intent::settings_update`.
    pub setting: &'static str,
}

pub(crate) const SETTING_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "mode",
        action: "set_mode",
        setting: "mode",
    },
    CommandSpec {
        command: "aspect",
        action: "set_aspect_ratio",
        setting: "aspect_ratio",
    },
    CommandSpec {
        command: "steps",
        action: "set_steps",
        setting: "inference_steps",
    },
    CommandSpec {
        command: "seed",
        action: "set_seed",
        setting: "seed",
    },
    CommandSpec {
        command: "negative",
        action: "set_negative_prompt",
        setting: "negative_prompt",
    },
];

pub(crate) const MODE_SHORTCUTS: &[&str] = &["fast", "pro"];

pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: "attach_upload",
    setting: "path",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
        setting: "",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        setting: "",
    },
    CommandSpec {
        command: "history",
        action: "history",
        setting: "",
    },
    CommandSpec {
        command: "detach",
        action: "clear_upload",
        setting: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/mode <fast|pro>",
    "/fast",
    "/pro",
    "/aspect <square|landscape_4_3|landscape_16_9|portrait_3_4|portrait_9_16|off>",
    "/steps <1-50|off>",
    "/seed <n|off>",
    "/negative <text|off>",
    "/upload <path>",
    "/detach",
    "/history",
    "/reset",
];
