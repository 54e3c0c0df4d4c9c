use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::app::{App, Dialog};
use crate::chat::MessageOp;
use crate::keymap::{Action, Focus};

/// Handle a key event and update app state.
pub fn handle_key_event(app: &mut App, key: KeyEvent) -> Result<()> {
    if key.kind == KeyEventKind::Release {
        return Ok(());
    }

    if app.dialog.is_some() {
        return handle_dialog_keys(app, key);
    }

    if app.focus == Focus::Chat && app.editing.is_some() {
        return handle_edit_keys(app, key);
    }

    if let Some(action) = app.keymap.lookup(app.focus, &key) {
        dispatch(app, action);
        return Ok(());
    }

    match app.focus {
        Focus::Input => handle_input_keys(app, key),
        Focus::Chat => handle_chat_keys(app, key),
        Focus::Context => handle_context_keys(app, key),
        Focus::Git => handle_git_keys(app, key),
    }
    Ok(())
}

/// Bracketed paste goes to whatever text box is active.
pub fn handle_paste(app: &mut App, text: &str) {
    if let Some(Dialog::Prompt { input, .. }) = app.dialog.as_mut() {
        input.insert_str(text);
        return;
    }
    if app.focus == Focus::Chat {
        if let Some((_, area)) = app.editing.as_mut() {
            area.insert_str(text);
            app.sync_draft();
            return;
        }
    }
    app.focus = Focus::Input;
    app.input.insert_str(text);
}

fn dispatch(app: &mut App, action: Action) {
    match action {
        Action::Quit => app.should_quit = true,
        Action::FocusNext => app.focus = app.focus.next(),
        Action::FocusInput => app.focus = Focus::Input,
        Action::Send => app.send_message(),
        Action::OptimizePrompt => app.optimize_prompt(),
        Action::ResetChat => app.reset_chat(),
        Action::EditQuery => app.request_edit_query(),
        Action::EditMessage => app.toggle_edit(),
        Action::HideMessage => app.toggle_hidden(),
        Action::Regenerate => app.regenerate(),
        Action::BranchPrev => app.switch_sibling(-1),
        Action::BranchNext => app.switch_sibling(1),
        Action::NextCodeBlock => app.cycle_code_block(),
        Action::CopyCode => app.copy_selected_code(),
        Action::ApplyCode => app.request_apply_code(),
        Action::NextLink => app.cycle_link(),
        Action::OpenLink => app.open_selected_link(),
        Action::ToggleFile => app.toggle_context_file(),
        Action::ToggleAll => app.toggle_context_container(),
        Action::ToggleYaml => app.toggle_yaml(),
        Action::SearchFiles => app.request_search(),
        Action::GitNewBranch => app.request_new_branch(),
        Action::GitCheckout => app.checkout_step(1),
        Action::GitCommit => app.request_commit(),
        Action::GitPush => app.request_push(),
        Action::GitMerge => app.request_merge(),
        Action::GitAutoCommit => app.toggle_auto_commit(),
        Action::SaveEdit => app.save_edit(),
        Action::ToggleNewBranch => app.toggle_new_branch_flag(),
        Action::CancelEdit => app.cancel_edit(),
    }
}

fn handle_dialog_keys(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Esc => app.dismiss_dialog(),
        KeyCode::Enter => app.submit_dialog(),
        KeyCode::Char('y') if matches!(app.dialog, Some(Dialog::Confirm { .. })) => {
            app.submit_dialog()
        }
        KeyCode::Char('n') if matches!(app.dialog, Some(Dialog::Confirm { .. })) => {
            app.dismiss_dialog()
        }
        _ => {
            if let Some(Dialog::Prompt { input, .. }) = app.dialog.as_mut() {
                input.handle_key(&key, false);
            }
        }
    }
    Ok(())
}

/// Keys while a message draft is open: the draft bindings and `Quit`,
/// everything else edits the text. A draft being saved ignores input.
fn handle_edit_keys(app: &mut App, key: KeyEvent) -> Result<()> {
    let Some((editing_key, _)) = &app.editing else {
        return Ok(());
    };
    let saving = matches!(app.chat.op(*editing_key), Some(MessageOp::Saving(_)));

    match app.keymap.lookup_draft(&key) {
        Some(Action::Quit) => app.should_quit = true,
        _ if saving => {}
        Some(action) => dispatch(app, action),
        None => {
            if let Some((_, area)) = app.editing.as_mut() {
                if area.handle_key(&key, true) {
                    app.sync_draft();
                }
            }
        }
    }
    Ok(())
}

fn handle_input_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        // Alt+Enter / Shift+Enter break the line; plain Enter is "send".
        KeyCode::Enter
            if key
                .modifiers
                .intersects(KeyModifiers::ALT | KeyModifiers::SHIFT) =>
        {
            app.input.insert_newline()
        }
        KeyCode::Esc => app.focus = Focus::Chat,
        _ => {
            app.input.handle_key(&key, true);
        }
    }
}

fn handle_chat_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::Home | KeyCode::Char('g') => {
            let first = app.chat.store().at(0).map(|m| m.key);
            app.select(first);
        }
        KeyCode::End | KeyCode::Char('G') => {
            let len = app.chat.store().len();
            let last = len.checked_sub(1).and_then(|i| app.chat.store().at(i)).map(|m| m.key);
            app.select(last);
        }
        KeyCode::PageUp => app.chat_scroll = app.chat_scroll.saturating_sub(10),
        KeyCode::PageDown => app.chat_scroll = app.chat_scroll.saturating_add(10),
        KeyCode::Esc => app.select(None),
        _ => {}
    }
}

fn handle_context_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => app.move_context_cursor(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_context_cursor(1),
        KeyCode::Home => app.context_cursor = 0,
        KeyCode::End => app.move_context_cursor(isize::MAX / 2),
        _ => {}
    }
}

fn handle_git_keys(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up | KeyCode::Left | KeyCode::Char('k') => app.checkout_step(-1),
        KeyCode::Down | KeyCode::Right | KeyCode::Char('j') => app.checkout_step(1),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use crate::api::AnalysisBackend;
    use crate::config::Config;
    use crate::test_support::{session, FakeBackend};

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (focus_tx, _focus_rx) = watch::channel(true);
        let backend: Arc<dyn AnalysisBackend> = Arc::new(FakeBackend::new());
        App::new(&Config::default(), session(), backend, tx, focus_tx)
    }

    fn press(app: &mut App, code: KeyCode, modifiers: KeyModifiers) {
        handle_key_event(app, KeyEvent::new(code, modifiers)).unwrap();
    }

    #[test]
    fn test_typing_goes_to_input() {
        let mut app = app();
        for c in "hi e".chars() {
            press(&mut app, KeyCode::Char(c), KeyModifiers::NONE);
        }
        press(&mut app, KeyCode::Enter, KeyModifiers::ALT);
        press(&mut app, KeyCode::Char('x'), KeyModifiers::NONE);
        assert_eq!(app.input.text(), "hi e\nx");
    }

    #[test]
    fn test_tab_cycles_focus_and_i_returns() {
        let mut app = app();
        press(&mut app, KeyCode::Tab, KeyModifiers::NONE);
        assert_eq!(app.focus, Focus::Chat);
        press(&mut app, KeyCode::Tab, KeyModifiers::NONE);
        assert_eq!(app.focus, Focus::Context);
        press(&mut app, KeyCode::Char('i'), KeyModifiers::NONE);
        assert_eq!(app.focus, Focus::Input);
    }

    #[test]
    fn test_quit_binding() {
        let mut app = app();
        press(&mut app, KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert!(app.should_quit);
    }

    #[test]
    fn test_dialog_captures_keys() {
        let mut app = app();
        app.request_edit_query();
        press(&mut app, KeyCode::Char('!'), KeyModifiers::NONE);
        match &app.dialog {
            Some(Dialog::Prompt { input, .. }) => {
                assert_eq!(input.text(), "where is the parser!")
            }
            other => panic!("expected prompt, got {other:?}"),
        }
        press(&mut app, KeyCode::Esc, KeyModifiers::NONE);
        assert!(app.dialog.is_none());
        assert!(app.input.is_blank());
    }

    #[test]
    fn test_paste_into_input() {
        let mut app = app();
        app.focus = Focus::Git;
        handle_paste(&mut app, "line one\r\nline two");
        assert_eq!(app.focus, Focus::Input);
        assert_eq!(app.input.text(), "line one\nline two");
    }
}
